mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{compute_available_slots, free_ranges, AvailableSlot};
pub use error::{EngineError, ErrorKind};
pub use queries::{BookingView, CourtInfo, EquipmentInfo};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use uuid::Uuid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::tasks::Scheduler;
use crate::wal::Wal;

pub type SharedCourtState = Arc<RwLock<CourtState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Owns all live state: courts (each behind its own RwLock), the flat
/// account and equipment registries, the WAL writer, the broadcast hub and
/// the notification scheduler.
pub struct Engine {
    pub courts: DashMap<Uuid, SharedCourtState>,
    pub accounts: DashMap<Uuid, Account>,
    pub equipment: DashMap<Uuid, Equipment>,
    /// Reverse lookup: booking or slot id → court id.
    pub(super) entity_to_court: DashMap<Uuid, Uuid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub scheduler: Arc<Scheduler>,
}

/// Apply a court-scoped event to a CourtState (no locking — caller holds
/// the lock).
fn apply_to_court(cs: &mut CourtState, event: &Event, index: &DashMap<Uuid, Uuid>) {
    match event {
        Event::WorkerAdded { id, name, email, .. } => {
            cs.workers.push(Worker {
                id: *id,
                name: name.clone(),
                email: email.clone(),
            });
        }
        Event::SlotAdded { id, court_id, kind, opening, closing } => {
            cs.slots.push(AvailabilitySlot {
                id: *id,
                kind: *kind,
                opening: *opening,
                closing: *closing,
            });
            index.insert(*id, *court_id);
        }
        Event::SlotRemoved { id, .. } => {
            cs.slots.retain(|s| s.id != *id);
            index.remove(id);
        }
        Event::BookingCreated {
            id,
            court_id,
            account_id,
            start_time,
            end_time,
            duration,
            created_at,
        } => {
            cs.insert_booking(Booking {
                id: *id,
                court_id: *court_id,
                account_id: *account_id,
                start_time: *start_time,
                end_time: *end_time,
                duration: *duration,
                created_at: *created_at,
            });
            index.insert(*id, *court_id);
        }
        Event::BookingRescheduled { id, start_time, end_time, duration, .. } => {
            // A reschedule replaces the interval; owner and creation stamp
            // carry over from the removed record.
            if let Some(old) = cs.remove_booking(*id) {
                cs.insert_booking(Booking {
                    id: *id,
                    court_id: old.court_id,
                    account_id: old.account_id,
                    start_time: *start_time,
                    end_time: *end_time,
                    duration: *duration,
                    created_at: old.created_at,
                });
            }
        }
        Event::BookingCancelled { id, .. } => {
            cs.remove_booking(*id);
            index.remove(id);
        }
        // Registry-level events are handled by Engine::apply_registry.
        _ => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        scheduler: Arc<Scheduler>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            courts: DashMap::new(),
            accounts: DashMap::new(),
            equipment: DashMap::new(),
            entity_to_court: DashMap::new(),
            wal_tx,
            notify,
            scheduler,
        };

        // Replay — we're the sole owner of the court Arcs here, so try_write
        // always succeeds instantly. Replay applies state only: no
        // broadcasts, no scheduled notifications.
        for event in &events {
            match event {
                Event::CourtCreated { .. }
                | Event::CourtDeleted { .. }
                | Event::AccountRegistered { .. }
                | Event::EquipmentCreated { .. }
                | Event::EquipmentAssigned { .. }
                | Event::EquipmentReturned { .. } => engine.apply_registry(event),
                other => {
                    if let Some(court_id) = event_court_id(other)
                        && let Some(entry) = engine.courts.get(&court_id)
                    {
                        let cs = entry.value().clone();
                        let mut guard = cs.try_write().expect("replay: uncontended write");
                        apply_to_court(&mut guard, other, &engine.entity_to_court);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Apply a registry-level (non-court-scoped) event to the flat maps.
    pub(super) fn apply_registry(&self, event: &Event) {
        match event {
            Event::CourtCreated { id, name, location, open, close, created_at } => {
                let cs = CourtState::new(
                    *id,
                    name.clone(),
                    location.clone(),
                    *open,
                    *close,
                    *created_at,
                );
                self.courts.insert(*id, Arc::new(RwLock::new(cs)));
            }
            Event::CourtDeleted { id } => {
                self.courts.remove(id);
                // Cascade: bookings and slots of the court disappear with it.
                self.entity_to_court.retain(|_, court| *court != *id);
            }
            Event::AccountRegistered {
                id,
                email,
                first_name,
                last_name,
                is_admin,
                created_at,
            } => {
                self.accounts.insert(
                    *id,
                    Account {
                        id: *id,
                        email: email.clone(),
                        first_name: first_name.clone(),
                        last_name: last_name.clone(),
                        is_admin: *is_admin,
                        created_at: *created_at,
                    },
                );
            }
            Event::EquipmentCreated { id, name, created_at } => {
                self.equipment.insert(
                    *id,
                    Equipment {
                        id: *id,
                        name: name.clone(),
                        borrowers: Vec::new(),
                        created_at: *created_at,
                    },
                );
            }
            Event::EquipmentAssigned { id, account_id } => {
                if let Some(mut eq) = self.equipment.get_mut(id)
                    && !eq.borrowers.contains(account_id)
                {
                    eq.borrowers.push(*account_id);
                }
            }
            Event::EquipmentReturned { id, account_id } => {
                if let Some(mut eq) = self.equipment.get_mut(id) {
                    eq.borrowers.retain(|a| a != account_id);
                }
            }
            _ => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn court(&self, id: &Uuid) -> Option<SharedCourtState> {
        self.courts.get(id).map(|e| e.value().clone())
    }

    pub fn court_for_entity(&self, entity_id: &Uuid) -> Option<Uuid> {
        self.entity_to_court.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call. Broadcasting and notification
    /// scheduling stay with the individual mutations — not every event
    /// fans out.
    pub(super) async fn persist_and_apply(
        &self,
        cs: &mut CourtState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_court(cs, event, &self.entity_to_court);
        Ok(())
    }

    /// Lookup booking/slot → court, fetch the court, acquire its write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Uuid,
    ) -> Option<(Uuid, tokio::sync::OwnedRwLockWriteGuard<CourtState>)> {
        let court_id = self.court_for_entity(entity_id)?;
        let cs = self.court(&court_id)?;
        let guard = cs.write_owned().await;
        Some((court_id, guard))
    }

    /// Compact the WAL down to the events that recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.accounts.iter() {
            let a = entry.value();
            events.push(Event::AccountRegistered {
                id: a.id,
                email: a.email.clone(),
                first_name: a.first_name.clone(),
                last_name: a.last_name.clone(),
                is_admin: a.is_admin,
                created_at: a.created_at,
            });
        }

        for entry in self.equipment.iter() {
            let eq = entry.value();
            events.push(Event::EquipmentCreated {
                id: eq.id,
                name: eq.name.clone(),
                created_at: eq.created_at,
            });
            for account_id in &eq.borrowers {
                events.push(Event::EquipmentAssigned { id: eq.id, account_id: *account_id });
            }
        }

        let court_arcs: Vec<SharedCourtState> =
            self.courts.iter().map(|e| e.value().clone()).collect();
        for cs in court_arcs {
            let guard = cs.read().await;
            events.push(Event::CourtCreated {
                id: guard.id,
                name: guard.name.clone(),
                location: guard.location.clone(),
                open: guard.open,
                close: guard.close,
                created_at: guard.created_at,
            });
            for w in &guard.workers {
                events.push(Event::WorkerAdded {
                    id: w.id,
                    court_id: guard.id,
                    name: w.name.clone(),
                    email: w.email.clone(),
                });
            }
            for s in &guard.slots {
                events.push(Event::SlotAdded {
                    id: s.id,
                    court_id: guard.id,
                    kind: s.kind,
                    opening: s.opening,
                    closing: s.closing,
                });
            }
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    court_id: guard.id,
                    account_id: b.account_id,
                    start_time: b.start_time,
                    end_time: b.end_time,
                    duration: b.duration,
                    created_at: b.created_at,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the court id from a court-scoped event.
fn event_court_id(event: &Event) -> Option<Uuid> {
    match event {
        Event::WorkerAdded { court_id, .. }
        | Event::SlotAdded { court_id, .. }
        | Event::SlotRemoved { court_id, .. }
        | Event::BookingCreated { court_id, .. }
        | Event::BookingRescheduled { court_id, .. }
        | Event::BookingCancelled { court_id, .. } => Some(*court_id),
        _ => None,
    }
}
