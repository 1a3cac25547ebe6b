use chrono::{DateTime, Duration, NaiveTime, Utc};
use uuid::Uuid;

use crate::limits::*;
use crate::model::*;
use crate::tasks::{cleanup_eta, reminder_eta, NotificationTask};

use super::conflict::{check_booking_allowed, now_utc};
use super::{Engine, EngineError};

impl Engine {
    // ── Accounts ─────────────────────────────────────────

    pub async fn create_account(
        &self,
        email: String,
        first_name: String,
        last_name: String,
        is_admin: bool,
    ) -> Result<Account, EngineError> {
        if self.accounts.len() >= MAX_ACCOUNTS {
            return Err(EngineError::LimitExceeded("too many accounts"));
        }
        if email.is_empty() || email.len() > MAX_EMAIL_LEN || !email.contains('@') {
            return Err(EngineError::InvalidInput("invalid email address".into()));
        }
        if first_name.len() > MAX_NAME_LEN || last_name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        if self.accounts.iter().any(|a| a.email == email) {
            return Err(EngineError::AlreadyExists(email));
        }

        let account = Account {
            id: Uuid::new_v4(),
            email,
            first_name,
            last_name,
            is_admin,
            created_at: now_utc(),
        };
        let event = Event::AccountRegistered {
            id: account.id,
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            last_name: account.last_name.clone(),
            is_admin: account.is_admin,
            created_at: account.created_at,
        };
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        Ok(account)
    }

    /// Idempotent startup seeding of the admin account.
    pub async fn ensure_admin(&self, email: &str) -> Result<Account, EngineError> {
        if let Some(existing) = self.accounts.iter().find(|a| a.email == email) {
            return Ok(existing.value().clone());
        }
        self.create_account(email.to_string(), "Site".into(), "Admin".into(), true)
            .await
    }

    // ── Courts, workers, slots ───────────────────────────

    pub async fn create_court(
        &self,
        name: String,
        location: String,
        open: NaiveTime,
        close: NaiveTime,
    ) -> Result<Uuid, EngineError> {
        if self.courts.len() >= MAX_COURTS {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN || location.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidInput("court name or location invalid".into()));
        }
        if open >= close {
            return Err(EngineError::InvalidInput(
                "opening time must be before closing time".into(),
            ));
        }

        let id = Uuid::new_v4();
        let event = Event::CourtCreated {
            id,
            name,
            location,
            open,
            close,
            created_at: now_utc(),
        };
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        Ok(id)
    }

    pub async fn delete_court(&self, id: Uuid) -> Result<(), EngineError> {
        let cs = self.court(&id).ok_or(EngineError::CourtNotFound(id))?;
        let guard = cs.read().await;
        let doomed = guard.bookings.clone();
        let court_name = guard.name.clone();
        drop(guard);

        let event = Event::CourtDeleted { id };
        self.wal_append(&event).await?;
        self.apply_registry(&event);

        // Cascade: every booking that dies with the court is announced and
        // its owner notified, as if cancelled individually.
        let admins = self.admin_emails();
        for b in &doomed {
            self.notify.send(id, CourtBroadcast::cancelled(b));
            if let Some(account) = self.accounts.get(&b.account_id) {
                self.scheduler.enqueue(NotificationTask::Cancellation {
                    to: account.email.clone(),
                    court: court_name.clone(),
                    start_time: b.start_time,
                    duration: b.duration,
                });
            }
            self.scheduler.enqueue(NotificationTask::AdminCancelNotice {
                to: admins.clone(),
                booking: b.summary(),
            });
        }
        self.notify.remove(&id);
        Ok(())
    }

    pub async fn add_worker(
        &self,
        court_id: Uuid,
        name: String,
        email: String,
    ) -> Result<Uuid, EngineError> {
        if name.len() > MAX_NAME_LEN || email.len() > MAX_EMAIL_LEN || !email.contains('@') {
            return Err(EngineError::InvalidInput("worker name or email invalid".into()));
        }
        let cs = self.court(&court_id).ok_or(EngineError::CourtNotFound(court_id))?;
        let mut guard = cs.write().await;
        if guard.workers.len() >= MAX_WORKERS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many workers on court"));
        }
        let id = Uuid::new_v4();
        let event = Event::WorkerAdded { id, court_id, name, email };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn add_slot(
        &self,
        court_id: Uuid,
        kind: SlotKind,
        opening: NaiveTime,
        closing: NaiveTime,
    ) -> Result<Uuid, EngineError> {
        if opening >= closing {
            return Err(EngineError::InvalidInput(
                "slot opening time must be before closing time".into(),
            ));
        }
        let cs = self.court(&court_id).ok_or(EngineError::CourtNotFound(court_id))?;
        let mut guard = cs.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many slots on court"));
        }
        let id = Uuid::new_v4();
        let event = Event::SlotAdded { id, court_id, kind, opening, closing };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn remove_slot(&self, slot_id: Uuid) -> Result<(), EngineError> {
        let (court_id, mut guard) = self
            .resolve_entity_write(&slot_id)
            .await
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        if !guard.slots.iter().any(|s| s.id == slot_id) {
            return Err(EngineError::SlotNotFound(slot_id));
        }
        let event = Event::SlotRemoved { id: slot_id, court_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Equipment ────────────────────────────────────────

    pub async fn create_equipment(&self, name: String) -> Result<Uuid, EngineError> {
        if self.equipment.len() >= MAX_EQUIPMENT {
            return Err(EngineError::LimitExceeded("too many equipment items"));
        }
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(EngineError::InvalidInput("equipment name invalid".into()));
        }
        let id = Uuid::new_v4();
        let event = Event::EquipmentCreated { id, name, created_at: now_utc() };
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        Ok(id)
    }

    pub async fn assign_equipment(
        &self,
        equipment_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), EngineError> {
        if !self.equipment.contains_key(&equipment_id) {
            return Err(EngineError::EquipmentNotFound(equipment_id));
        }
        if !self.accounts.contains_key(&account_id) {
            return Err(EngineError::AccountNotFound(account_id));
        }
        let event = Event::EquipmentAssigned { id: equipment_id, account_id };
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        Ok(())
    }

    pub async fn return_equipment(
        &self,
        equipment_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), EngineError> {
        if !self.equipment.contains_key(&equipment_id) {
            return Err(EngineError::EquipmentNotFound(equipment_id));
        }
        let event = Event::EquipmentReturned { id: equipment_id, account_id };
        self.wal_append(&event).await?;
        self.apply_registry(&event);
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────

    pub async fn create_booking(
        &self,
        court_id: Uuid,
        account_id: Uuid,
        start_time: DateTime<Utc>,
        duration: i64,
    ) -> Result<Booking, EngineError> {
        let account = self
            .accounts
            .get(&account_id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::AccountNotFound(account_id))?;
        if duration < 1 || duration > MAX_DURATION_HOURS {
            return Err(EngineError::InvalidInput(
                "duration must be a positive number of hours".into(),
            ));
        }
        let end_time = start_time + Duration::hours(duration);

        let cs = self.court(&court_id).ok_or(EngineError::CourtNotFound(court_id))?;
        let mut guard = cs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many bookings on court"));
        }

        let now = now_utc();
        if let Err(e) = check_booking_allowed(&guard, start_time, end_time, now, None) {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: Uuid::new_v4(),
            court_id,
            account_id,
            start_time,
            end_time,
            duration,
            created_at: now,
        };
        let event = Event::BookingCreated {
            id: booking.id,
            court_id,
            account_id,
            start_time,
            end_time,
            duration,
            created_at: booking.created_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);

        self.notify.send(court_id, CourtBroadcast::booked(&booking));
        self.fan_out_created(&guard, &account, &booking, now);
        Ok(booking)
    }

    pub async fn reschedule_booking(
        &self,
        booking_id: Uuid,
        account_id: Uuid,
        start_time: DateTime<Utc>,
        duration: i64,
    ) -> Result<Booking, EngineError> {
        if duration < 1 || duration > MAX_DURATION_HOURS {
            return Err(EngineError::InvalidInput(
                "duration must be a positive number of hours".into(),
            ));
        }
        let end_time = start_time + Duration::hours(duration);

        let (court_id, mut guard) = self
            .resolve_entity_write(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let old = guard
            .booking(booking_id)
            .filter(|b| b.account_id == account_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        let now = now_utc();
        if let Err(e) =
            check_booking_allowed(&guard, start_time, end_time, now, Some(booking_id))
        {
            metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        // A reschedule is a cancel-plus-rebook as far as subscribers are
        // concerned: the old interval is announced as cancelled first.
        self.notify.send(court_id, CourtBroadcast::cancelled(&old));

        let event = Event::BookingRescheduled {
            id: booking_id,
            court_id,
            start_time,
            end_time,
            duration,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        let updated = guard
            .booking(booking_id)
            .cloned()
            .expect("rescheduled booking still present");
        self.notify.send(court_id, CourtBroadcast::booked(&updated));

        let account_email = self
            .accounts
            .get(&account_id)
            .map(|a| a.email.clone())
            .unwrap_or_default();
        self.scheduler.enqueue(NotificationTask::BookingChanged {
            to: account_email,
            court: guard.name.clone(),
            start_time: updated.start_time,
            duration: updated.duration,
        });
        self.schedule_worker_cleanup(&guard, now);
        Ok(updated)
    }

    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        account_id: Uuid,
    ) -> Result<(), EngineError> {
        let (court_id, mut guard) = self
            .resolve_entity_write(&booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let old = guard
            .booking(booking_id)
            .filter(|b| b.account_id == account_id)
            .cloned()
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        let event = Event::BookingCancelled { id: booking_id, court_id };
        self.persist_and_apply(&mut guard, &event).await?;

        self.notify.send(court_id, CourtBroadcast::cancelled(&old));

        let account_email = self
            .accounts
            .get(&account_id)
            .map(|a| a.email.clone())
            .unwrap_or_default();
        self.scheduler.enqueue(NotificationTask::Cancellation {
            to: account_email,
            court: guard.name.clone(),
            start_time: old.start_time,
            duration: old.duration,
        });
        let admins = self.admin_emails();
        self.scheduler.enqueue(NotificationTask::AdminCancelNotice {
            to: admins,
            booking: old.summary(),
        });
        Ok(())
    }

    /// Create-side fan-out: confirmation now, reminder 12h before start,
    /// admin notice now, worker cleanup 2 minutes from now. All best-effort.
    fn fan_out_created(
        &self,
        court: &CourtState,
        account: &Account,
        booking: &Booking,
        now: DateTime<Utc>,
    ) {
        self.scheduler.enqueue(NotificationTask::Confirmation {
            to: account.email.clone(),
            court: court.name.clone(),
            start_time: booking.start_time,
            duration: booking.duration,
        });
        self.scheduler.schedule(
            NotificationTask::Reminder {
                to: account.email.clone(),
                court: court.name.clone(),
                start_time: booking.start_time,
                duration: booking.duration,
            },
            reminder_eta(booking),
        );
        let admins = self.admin_emails();
        self.scheduler.enqueue(NotificationTask::AdminNotice {
            to: admins,
            booking: booking.summary(),
        });
        self.schedule_worker_cleanup(court, now);
    }

    fn schedule_worker_cleanup(&self, court: &CourtState, now: DateTime<Utc>) {
        let to: Vec<String> = court.workers.iter().map(|w| w.email.clone()).collect();
        self.scheduler.schedule(
            NotificationTask::WorkerCleanup { to, court: court.name.clone() },
            cleanup_eta(now),
        );
    }
}
