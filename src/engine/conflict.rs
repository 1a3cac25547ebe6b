use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::CourtState;

use super::error::EngineError;

pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Gate a proposed `[start, end)` against a court.
///
/// Rejects bookings starting in the past, bookings not strictly within the
/// court's operating hours, and bookings overlapping an existing one under
/// the half-open rule (touching at a boundary is allowed). `exclude` skips
/// one booking id so a reschedule does not collide with itself.
///
/// Callers hold the court's write lock for the whole check-then-persist
/// sequence, which is what makes two concurrent requests for the same slot
/// resolve to exactly one winner.
pub fn check_booking_allowed(
    court: &CourtState,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
    exclude: Option<Uuid>,
) -> Result<(), EngineError> {
    if start < now {
        return Err(EngineError::StartInPast);
    }
    if start.time() <= court.open || end.time() >= court.close {
        return Err(EngineError::OutsideOperatingHours);
    }

    // Bookings are sorted by start; everything from the first booking
    // starting at or after `end` cannot conflict.
    let upper = court.bookings.partition_point(|b| b.start_time < end);
    for existing in &court.bookings[..upper] {
        if exclude == Some(existing.id) {
            continue;
        }
        if existing.blocks(start, end) {
            return Err(EngineError::SlotTaken(existing.id));
        }
    }
    Ok(())
}
