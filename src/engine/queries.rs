use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::Booking;

use super::availability::{compute_available_slots, AvailableSlot};
use super::{Engine, EngineError, SharedCourtState};

// ── Query result types ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourtInfo {
    pub court_id: Uuid,
    pub name: String,
    pub location: String,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

/// A booking as its owner sees it in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingView {
    pub booking_id: Uuid,
    pub court_name: String,
    pub start_time: DateTime<Utc>,
    pub duration: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EquipmentInfo {
    pub equipment_id: Uuid,
    pub name: String,
    pub borrowers: Vec<Uuid>,
}

impl Engine {
    pub async fn list_courts(&self) -> Vec<CourtInfo> {
        let arcs: Vec<SharedCourtState> =
            self.courts.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for cs in arcs {
            let guard = cs.read().await;
            out.push(CourtInfo {
                court_id: guard.id,
                name: guard.name.clone(),
                location: guard.location.clone(),
                open: guard.open,
                close: guard.close,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// All bookings owned by `account_id`, soonest first.
    pub async fn account_bookings(&self, account_id: Uuid) -> Vec<BookingView> {
        let arcs: Vec<SharedCourtState> =
            self.courts.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for cs in arcs {
            let guard = cs.read().await;
            for b in guard.bookings.iter().filter(|b| b.account_id == account_id) {
                out.push(BookingView {
                    booking_id: b.id,
                    court_name: guard.name.clone(),
                    start_time: b.start_time,
                    duration: b.duration,
                    created_at: b.created_at,
                });
            }
        }
        out.sort_by_key(|v| v.start_time);
        out
    }

    /// Bookable slots of a court on `date`.
    pub async fn court_availability(
        &self,
        court_id: Uuid,
        date: NaiveDate,
        timezone: &str,
        buffer_minutes: i64,
    ) -> Result<Vec<AvailableSlot>, EngineError> {
        let cs = self.court(&court_id).ok_or(EngineError::CourtNotFound(court_id))?;
        let guard = cs.read().await;
        let booked = guard.booked_ranges_on(date);
        let windows = guard.day_windows(date);
        compute_available_slots(date, &booked, &windows, timezone, buffer_minutes)
    }

    /// Bookings starting on `date` that were created after `watermark`,
    /// joined with the owner's email, in creation order. Feeds the daily
    /// reminder sweep.
    pub async fn bookings_starting_on(
        &self,
        date: NaiveDate,
        watermark: DateTime<Utc>,
    ) -> Vec<(String, String, Booking)> {
        let arcs: Vec<SharedCourtState> =
            self.courts.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for cs in arcs {
            let guard = cs.read().await;
            for b in &guard.bookings {
                if b.start_time.date_naive() != date || b.created_at <= watermark {
                    continue;
                }
                if let Some(account) = self.accounts.get(&b.account_id) {
                    out.push((account.email.clone(), guard.name.clone(), b.clone()));
                }
            }
        }
        out.sort_by_key(|(_, _, b)| b.created_at);
        out
    }

    pub fn list_equipment(&self) -> Vec<EquipmentInfo> {
        let mut out: Vec<EquipmentInfo> = self
            .equipment
            .iter()
            .map(|e| EquipmentInfo {
                equipment_id: e.id,
                name: e.name.clone(),
                borrowers: e.borrowers.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn account(&self, id: Uuid) -> Option<crate::model::Account> {
        self.accounts.get(&id).map(|e| e.value().clone())
    }

    pub(super) fn admin_emails(&self) -> Vec<String> {
        self.accounts
            .iter()
            .filter(|a| a.is_admin)
            .map(|a| a.email.clone())
            .collect()
    }
}
