use super::*;
use crate::mailer::testing::RecordingMailer;
use crate::mailer::LogMailer;
use crate::tasks::Scheduler;

use chrono::{DateTime, Duration, NaiveTime, Utc};

const COURT_OPEN: u32 = 8;
const COURT_CLOSE: u32 = 16;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("courtside_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// Tomorrow at the given wall-clock hour:minute, so bookings are always in
/// the future relative to `now`.
fn tomorrow_at(h: u32, m: u32) -> DateTime<Utc> {
    (Utc::now() + Duration::days(1))
        .date_naive()
        .and_hms_opt(h, m, 0)
        .unwrap()
        .and_utc()
}

fn test_engine(name: &str) -> Engine {
    Engine::new(
        test_wal_path(name),
        Arc::new(NotifyHub::new()),
        Arc::new(Scheduler::new(Arc::new(LogMailer))),
    )
    .unwrap()
}

fn test_engine_recording(name: &str) -> (Engine, Arc<RecordingMailer>) {
    let mailer = Arc::new(RecordingMailer::default());
    let engine = Engine::new(
        test_wal_path(name),
        Arc::new(NotifyHub::new()),
        Arc::new(Scheduler::new(mailer.clone())),
    )
    .unwrap();
    (engine, mailer)
}

/// An engine with one player account and one court open 08:00–16:00.
async fn seeded(name: &str) -> (Engine, Uuid, Uuid) {
    let engine = test_engine(name);
    let account = engine
        .create_account("player@example.com".into(), "Jo".into(), "Park".into(), false)
        .await
        .unwrap();
    let court = engine
        .create_court("Court 1".into(), "North".into(), t(COURT_OPEN, 0), t(COURT_CLOSE, 0))
        .await
        .unwrap();
    (engine, account.id, court)
}

// ── Courts and accounts ──────────────────────────────────

#[tokio::test]
async fn create_court_and_list() {
    let engine = test_engine("create_court.wal");
    let id = engine
        .create_court("Centre Court".into(), "Main".into(), t(8, 0), t(22, 0))
        .await
        .unwrap();

    let courts = engine.list_courts().await;
    assert_eq!(courts.len(), 1);
    assert_eq!(courts[0].court_id, id);
    assert_eq!(courts[0].name, "Centre Court");
    assert_eq!(courts[0].open, t(8, 0));
    assert_eq!(courts[0].close, t(22, 0));
}

#[tokio::test]
async fn create_court_invalid_hours_rejected() {
    let engine = test_engine("court_bad_hours.wal");
    let result = engine
        .create_court("Court".into(), "X".into(), t(16, 0), t(8, 0))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));
}

#[tokio::test]
async fn duplicate_email_rejected() {
    let engine = test_engine("dup_email.wal");
    engine
        .create_account("a@example.com".into(), "A".into(), "B".into(), false)
        .await
        .unwrap();
    let result = engine
        .create_account("a@example.com".into(), "C".into(), "D".into(), false)
        .await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn ensure_admin_is_idempotent() {
    let engine = test_engine("ensure_admin.wal");
    let first = engine.ensure_admin("admin@example.com").await.unwrap();
    let second = engine.ensure_admin("admin@example.com").await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.is_admin);
    assert_eq!(engine.accounts.len(), 1);
}

// ── Booking validation ───────────────────────────────────

#[tokio::test]
async fn booking_success_and_listing() {
    let (engine, account, court) = seeded("booking_ok.wal").await;
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 2)
        .await
        .unwrap();
    assert_eq!(booking.end_time, booking.start_time + Duration::hours(2));
    assert_eq!(booking.duration, 2);

    let views = engine.account_bookings(account).await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].booking_id, booking.id);
    assert_eq!(views[0].court_name, "Court 1");
}

#[tokio::test]
async fn booking_in_past_rejected() {
    let (engine, account, court) = seeded("booking_past.wal").await;
    let yesterday = Utc::now() - Duration::days(1);
    let result = engine.create_booking(court, account, yesterday, 1).await;
    assert!(matches!(result, Err(EngineError::StartInPast)));
}

#[tokio::test]
async fn booking_duration_must_be_positive_hours() {
    let (engine, account, court) = seeded("booking_duration.wal").await;
    for bad in [0, -1, 25] {
        let result = engine
            .create_booking(court, account, tomorrow_at(10, 0), bad)
            .await;
        assert!(matches!(result, Err(EngineError::InvalidInput(_))), "duration {bad}");
    }
}

#[tokio::test]
async fn booking_operating_hours_boundaries() {
    let (engine, account, court) = seeded("booking_hours.wal").await;

    // Before opening.
    let result = engine.create_booking(court, account, tomorrow_at(7, 0), 2).await;
    assert!(matches!(result, Err(EngineError::OutsideOperatingHours)));

    // Starting exactly at the opening boundary is still outside.
    let result = engine
        .create_booking(court, account, tomorrow_at(COURT_OPEN, 0), 1)
        .await;
    assert!(matches!(result, Err(EngineError::OutsideOperatingHours)));

    // Ending exactly at the closing boundary is still outside.
    let result = engine
        .create_booking(court, account, tomorrow_at(COURT_CLOSE - 1, 0), 1)
        .await;
    assert!(matches!(result, Err(EngineError::OutsideOperatingHours)));

    // Strictly inside is fine.
    tokio_test::assert_ok!(
        engine.create_booking(court, account, tomorrow_at(10, 0), 1).await
    );
}

#[tokio::test]
async fn touching_bookings_do_not_conflict() {
    let (engine, account, court) = seeded("booking_touch.wal").await;
    engine
        .create_booking(court, account, tomorrow_at(10, 0), 2)
        .await
        .unwrap();

    // Starts exactly where the existing one ends.
    tokio_test::assert_ok!(
        engine.create_booking(court, account, tomorrow_at(12, 0), 1).await
    );
    // Ends exactly where the existing one starts.
    tokio_test::assert_ok!(
        engine.create_booking(court, account, tomorrow_at(9, 0), 1).await
    );
}

#[tokio::test]
async fn overlapping_booking_rejected() {
    let (engine, account, court) = seeded("booking_overlap.wal").await;
    let existing = engine
        .create_booking(court, account, tomorrow_at(10, 0), 2)
        .await
        .unwrap();

    // 09:30–10:30 overlaps 10:00–12:00.
    let result = engine.create_booking(court, account, tomorrow_at(9, 30), 1).await;
    assert!(matches!(result, Err(EngineError::SlotTaken(id)) if id == existing.id));

    // Fully inside.
    let result = engine.create_booking(court, account, tomorrow_at(10, 30), 1).await;
    assert!(matches!(result, Err(EngineError::SlotTaken(_))));

    // Identical range.
    let result = engine.create_booking(court, account, tomorrow_at(10, 0), 2).await;
    assert!(matches!(result, Err(EngineError::SlotTaken(_))));
}

#[tokio::test]
async fn concurrent_bookings_resolve_to_one_winner() {
    let (engine, account, court) = seeded("booking_race.wal").await;
    let engine = Arc::new(engine);

    let start = tomorrow_at(10, 0);
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_booking(court, account, start, 2).await
        }));
    }

    let mut ok = 0;
    let mut conflict = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::SlotTaken(_)) => conflict += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflict, 1);
}

// ── Cancel and reschedule ────────────────────────────────

#[tokio::test]
async fn cancel_booking_flow() {
    let (engine, account, court) = seeded("cancel_flow.wal").await;
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 1)
        .await
        .unwrap();

    engine.cancel_booking(booking.id, account).await.unwrap();
    assert!(engine.account_bookings(account).await.is_empty());

    // Cancelling again: the booking no longer exists.
    let result = engine.cancel_booking(booking.id, account).await;
    assert!(matches!(result, Err(EngineError::BookingNotFound(_))));
}

#[tokio::test]
async fn cancel_requires_ownership() {
    let (engine, account, court) = seeded("cancel_owner.wal").await;
    let other = engine
        .create_account("other@example.com".into(), "O".into(), "T".into(), false)
        .await
        .unwrap();
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 1)
        .await
        .unwrap();

    // Another account cannot see or cancel it.
    let result = engine.cancel_booking(booking.id, other.id).await;
    assert!(matches!(result, Err(EngineError::BookingNotFound(_))));
    assert_eq!(engine.account_bookings(account).await.len(), 1);
}

#[tokio::test]
async fn reschedule_moves_booking() {
    let (engine, account, court) = seeded("reschedule.wal").await;
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 2)
        .await
        .unwrap();

    let moved = engine
        .reschedule_booking(booking.id, account, tomorrow_at(13, 0), 1)
        .await
        .unwrap();
    assert_eq!(moved.id, booking.id);
    assert_eq!(moved.start_time, tomorrow_at(13, 0));
    assert_eq!(moved.duration, 1);
    assert_eq!(moved.created_at, booking.created_at);

    let views = engine.account_bookings(account).await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].start_time, tomorrow_at(13, 0));
}

#[tokio::test]
async fn reschedule_does_not_conflict_with_itself() {
    let (engine, account, court) = seeded("reschedule_self.wal").await;
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 2)
        .await
        .unwrap();

    // Shrinking within its own old interval must succeed.
    tokio_test::assert_ok!(
        engine.reschedule_booking(booking.id, account, tomorrow_at(10, 0), 1).await
    );
}

#[tokio::test]
async fn reschedule_onto_other_booking_rejected() {
    let (engine, account, court) = seeded("reschedule_conflict.wal").await;
    let first = engine
        .create_booking(court, account, tomorrow_at(10, 0), 1)
        .await
        .unwrap();
    let second = engine
        .create_booking(court, account, tomorrow_at(12, 0), 1)
        .await
        .unwrap();

    let result = engine
        .reschedule_booking(second.id, account, tomorrow_at(10, 30), 1)
        .await;
    assert!(matches!(result, Err(EngineError::SlotTaken(id)) if id == first.id));
}

// ── Broadcasts ───────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_broadcasts() {
    let (engine, account, court) = seeded("broadcasts.wal").await;
    let mut rx = engine.notify.subscribe(court);

    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 1)
        .await
        .unwrap();
    let msg = rx.recv().await.unwrap();
    assert_eq!(msg, CourtBroadcast::booked(&booking));

    engine.cancel_booking(booking.id, account).await.unwrap();
    let msg = rx.recv().await.unwrap();
    assert_eq!(msg, CourtBroadcast::cancelled(&booking));
}

#[tokio::test]
async fn reschedule_broadcasts_cancel_then_book() {
    let (engine, account, court) = seeded("broadcast_reschedule.wal").await;
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 1)
        .await
        .unwrap();

    let mut rx = engine.notify.subscribe(court);
    let moved = engine
        .reschedule_booking(booking.id, account, tomorrow_at(13, 0), 1)
        .await
        .unwrap();

    assert_eq!(rx.recv().await.unwrap(), CourtBroadcast::cancelled(&booking));
    assert_eq!(rx.recv().await.unwrap(), CourtBroadcast::booked(&moved));
}

// ── Notification fan-out ─────────────────────────────────

#[tokio::test]
async fn create_fan_out_sends_confirmation_and_admin_notice() {
    let (engine, mailer) = test_engine_recording("fanout_create.wal");
    engine.ensure_admin("admin@example.com").await.unwrap();
    let account = engine
        .create_account("player@example.com".into(), "Jo".into(), "Park".into(), false)
        .await
        .unwrap();
    let court = engine
        .create_court("Court 1".into(), "North".into(), t(8, 0), t(16, 0))
        .await
        .unwrap();

    engine
        .create_booking(court, account.id, tomorrow_at(12, 0), 1)
        .await
        .unwrap();

    // Confirmation and admin notice are immediate; the reminder (12h before
    // start) and worker cleanup (+2min) stay scheduled.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let sent = mailer.sent.lock().unwrap();
    let subjects: Vec<&str> = sent.iter().map(|(_, s, _)| s.as_str()).collect();
    assert!(subjects.contains(&"Booking Confirmation"));
    assert!(subjects.contains(&"New Booking"));
    assert!(!subjects.contains(&"Booking Reminder"));
    assert!(!subjects.contains(&"Cleaning Reminder"));

    let confirmation = sent.iter().find(|(_, s, _)| s == "Booking Confirmation").unwrap();
    assert_eq!(confirmation.0, vec!["player@example.com".to_string()]);
    let admin_notice = sent.iter().find(|(_, s, _)| s == "New Booking").unwrap();
    assert_eq!(admin_notice.0, vec!["admin@example.com".to_string()]);
}

#[tokio::test]
async fn cancel_fan_out_notifies_account_and_admins() {
    let (engine, mailer) = test_engine_recording("fanout_cancel.wal");
    engine.ensure_admin("admin@example.com").await.unwrap();
    let account = engine
        .create_account("player@example.com".into(), "Jo".into(), "Park".into(), false)
        .await
        .unwrap();
    let court = engine
        .create_court("Court 1".into(), "North".into(), t(8, 0), t(16, 0))
        .await
        .unwrap();
    let booking = engine
        .create_booking(court, account.id, tomorrow_at(12, 0), 1)
        .await
        .unwrap();

    engine.cancel_booking(booking.id, account.id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let sent = mailer.sent.lock().unwrap();
    let subjects: Vec<&str> = sent.iter().map(|(_, s, _)| s.as_str()).collect();
    assert!(subjects.contains(&"Booking Cancellation"));
    assert!(subjects.contains(&"Booking Cancelled"));
}

// ── Cascade delete, WAL replay ───────────────────────────

#[tokio::test]
async fn delete_court_cascades_bookings() {
    let (engine, account, court) = seeded("delete_cascade.wal").await;
    let booking = engine
        .create_booking(court, account, tomorrow_at(10, 0), 1)
        .await
        .unwrap();
    let mut rx = engine.notify.subscribe(court);

    engine.delete_court(court).await.unwrap();
    assert!(engine.court(&court).is_none());
    assert!(engine.court_for_entity(&booking.id).is_none());

    // The doomed booking is announced as cancelled on the way out.
    assert_eq!(rx.recv().await.unwrap(), CourtBroadcast::cancelled(&booking));

    let result = engine.cancel_booking(booking.id, account).await;
    assert!(matches!(result, Err(EngineError::BookingNotFound(_))));
}

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay_state.wal");
    let start = tomorrow_at(10, 0);

    let (account_id, court_id, booking_id) = {
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            Arc::new(Scheduler::new(Arc::new(LogMailer))),
        )
        .unwrap();
        let account = engine
            .create_account("player@example.com".into(), "Jo".into(), "Park".into(), false)
            .await
            .unwrap();
        let court = engine
            .create_court("Court 1".into(), "North".into(), t(8, 0), t(16, 0))
            .await
            .unwrap();
        engine
            .add_worker(court, "Sam".into(), "sam@example.com".into())
            .await
            .unwrap();
        engine
            .add_slot(court, SlotKind::Weekly(chrono::Weekday::Mon), t(9, 0), t(13, 0))
            .await
            .unwrap();
        let booking = engine.create_booking(court, account.id, start, 1).await.unwrap();
        (account.id, court, booking.id)
    };

    let engine = Engine::new(
        path,
        Arc::new(NotifyHub::new()),
        Arc::new(Scheduler::new(Arc::new(LogMailer))),
    )
    .unwrap();

    assert!(engine.account(account_id).is_some());
    let cs = engine.court(&court_id).unwrap();
    {
        let guard = cs.read().await;
        assert_eq!(guard.workers.len(), 1);
        assert_eq!(guard.slots.len(), 1);
        assert_eq!(guard.bookings.len(), 1);
        assert_eq!(guard.bookings[0].start_time, start);
    }

    // The booking index survives replay: the owner can still cancel.
    tokio_test::assert_ok!(engine.cancel_booking(booking_id, account_id).await);
}

// ── Availability through the engine ──────────────────────

#[tokio::test]
async fn court_availability_uses_operating_hours_without_slots() {
    let (engine, account, court) = seeded("avail_hours.wal").await;
    let start = tomorrow_at(10, 0);
    engine.create_booking(court, account, start, 2).await.unwrap();

    let date = start.date_naive();
    let slots = engine.court_availability(court, date, "UTC", 0).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].start_time, t(COURT_OPEN, 0));
    assert_eq!(slots[0].end_time, t(10, 0));
    assert_eq!(slots[1].start_time, t(12, 0));
    assert_eq!(slots[1].end_time, t(COURT_CLOSE, 0));
    assert_eq!(slots[0].date, date);
}

#[tokio::test]
async fn court_availability_prefers_schedule_slots() {
    let (engine, account, court) = seeded("avail_slots.wal").await;
    let start = tomorrow_at(10, 0);
    let date = start.date_naive();
    let weekday = chrono::Datelike::weekday(&date);

    engine.add_slot(court, SlotKind::Weekly(weekday), t(9, 0), t(13, 0)).await.unwrap();
    engine.create_booking(court, account, start, 2).await.unwrap();

    let slots = engine.court_availability(court, date, "UTC", 0).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!((slots[0].start_time, slots[0].end_time), (t(9, 0), t(10, 0)));
    assert_eq!((slots[1].start_time, slots[1].end_time), (t(12, 0), t(13, 0)));
}

#[tokio::test]
async fn court_availability_unknown_court() {
    let engine = test_engine("avail_unknown.wal");
    let result = engine
        .court_availability(Uuid::new_v4(), Utc::now().date_naive(), "UTC", 0)
        .await;
    assert!(matches!(result, Err(EngineError::CourtNotFound(_))));
}

// ── Slots and equipment ──────────────────────────────────

#[tokio::test]
async fn slot_management() {
    let (engine, _, court) = seeded("slots.wal").await;

    let result = engine
        .add_slot(court, SlotKind::Weekly(chrono::Weekday::Mon), t(13, 0), t(9, 0))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidInput(_))));

    let slot = engine
        .add_slot(court, SlotKind::Weekly(chrono::Weekday::Mon), t(9, 0), t(13, 0))
        .await
        .unwrap();
    engine.remove_slot(slot).await.unwrap();

    let result = engine.remove_slot(slot).await;
    assert!(matches!(result, Err(EngineError::SlotNotFound(_))));
}

#[tokio::test]
async fn equipment_assign_and_return() {
    let engine = test_engine("equipment.wal");
    let account = engine
        .create_account("player@example.com".into(), "Jo".into(), "Park".into(), false)
        .await
        .unwrap();
    let racket = engine.create_equipment("Racket 7".into()).await.unwrap();

    engine.assign_equipment(racket, account.id).await.unwrap();
    // Assigning twice does not duplicate the borrower.
    engine.assign_equipment(racket, account.id).await.unwrap();

    let listed = engine.list_equipment();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].borrowers, vec![account.id]);

    engine.return_equipment(racket, account.id).await.unwrap();
    assert!(engine.list_equipment()[0].borrowers.is_empty());

    let result = engine.assign_equipment(Uuid::new_v4(), account.id).await;
    assert!(matches!(result, Err(EngineError::EquipmentNotFound(_))));
}
