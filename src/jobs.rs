use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::engine::Engine;
use crate::tasks::NotificationTask;

/// Periodic reminder sweep: every tick, mail a reminder for each booking
/// starting tomorrow that was created since the last sweep. The watermark is
/// monotonic last-write-wins state owned by this single task.
pub async fn run_reminder_sweep(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // Start far enough back that bookings made before the first sweep still
    // get their reminder.
    let mut watermark = Utc::now() - chrono::Duration::days(10);
    loop {
        interval.tick().await;
        watermark = sweep_once(&engine, watermark).await;
    }
}

/// One sweep pass. Returns the advanced watermark.
pub(crate) async fn sweep_once(engine: &Engine, watermark: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = (Utc::now() + chrono::Duration::days(1)).date_naive();
    let due = engine.bookings_starting_on(tomorrow, watermark).await;

    let mut new_watermark = watermark;
    for (email, court_name, booking) in due {
        engine.scheduler.enqueue(NotificationTask::Reminder {
            to: email,
            court: court_name,
            start_time: booking.start_time,
            duration: booking.duration,
        });
        new_watermark = new_watermark.max(booking.created_at);
    }
    new_watermark
}

/// Background task that rewrites the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => error!("WAL compaction failed: {e}"),
        }
    }
}
