use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::limits::MAX_BUFFER_MINUTES;
use crate::model::TimeRange;

use super::error::EngineError;

// ── Availability Algorithm ────────────────────────────────────────

/// A bookable slot as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailableSlot {
    pub date: NaiveDate,
    pub weekday: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

fn slot(date: NaiveDate, weekday: &str, start: NaiveTime, end: NaiveTime) -> AvailableSlot {
    AvailableSlot {
        date,
        weekday: weekday.to_string(),
        start_time: start,
        end_time: end,
    }
}

fn add_minutes(t: NaiveTime, minutes: i64) -> NaiveTime {
    t.overflowing_add_signed(chrono::Duration::minutes(minutes)).0
}

/// Compute the bookable sub-ranges of `date`.
///
/// The booked ranges are complemented across the whole day
/// `[00:00:00, 23:59:59]`, and each resulting free range is intersected
/// against every availability window. The windows themselves are returned
/// untouched when nothing is booked; an empty window list means nothing is
/// bookable at all.
///
/// `buffer_minutes` pushes the start of the first emitted slot only; every
/// later slot in the same call is emitted with no buffer.
pub fn compute_available_slots(
    date: NaiveDate,
    booked_ranges: &[TimeRange],
    availability_ranges: &[TimeRange],
    timezone: &str,
    buffer_minutes: i64,
) -> Result<Vec<AvailableSlot>, EngineError> {
    if buffer_minutes < 0 {
        return Err(EngineError::InvalidInput(
            "buffer_minutes must be a non-negative integer".into(),
        ));
    }
    if buffer_minutes > MAX_BUFFER_MINUTES {
        return Err(EngineError::LimitExceeded("buffer too large"));
    }
    if availability_ranges.is_empty() {
        return Ok(Vec::new());
    }
    if booked_ranges.is_empty() {
        // Nothing booked: the windows pass through as-is, unbuffered,
        // labelled with the plain calendar date.
        let weekday = date.format("%A").to_string();
        return Ok(availability_ranges
            .iter()
            .map(|w| slot(date, &weekday, w.start, w.end))
            .collect());
    }

    // The zone only matters once there is real work to do; the label follows
    // the zone's view of the date's UTC midnight.
    let tz: Tz = timezone
        .parse()
        .map_err(|_| EngineError::InvalidInput(format!("unknown timezone: {timezone}")))?;
    let local = Utc
        .from_utc_datetime(&date.and_time(NaiveTime::MIN))
        .with_timezone(&tz);
    let label_date = local.date_naive();
    let weekday = label_date.format("%A").to_string();

    let mut booked = booked_ranges.to_vec();
    booked.sort_by_key(|r| r.start);
    let mut windows = availability_ranges.to_vec();
    windows.sort_by_key(|r| r.start);

    let free = free_ranges(&booked);

    let mut out: Vec<AvailableSlot> = Vec::new();
    for fr in &free {
        for w in &windows {
            // Buffer applies to the first emitted slot only.
            let buffer = if out.is_empty() { buffer_minutes } else { 0 };

            if fr.end < w.start {
                // Free range ends before the window starts.
                continue;
            }
            if fr.start <= w.start && fr.end <= w.end && fr.end != w.start {
                // Runs into the window: truncate the start.
                out.push(slot(label_date, &weekday, add_minutes(w.start, buffer), fr.end));
                continue;
            }
            if fr.start >= w.start && fr.end <= w.end {
                // Fully inside the window.
                out.push(slot(label_date, &weekday, add_minutes(fr.start, buffer), fr.end));
                continue;
            }
            if fr.start >= w.start && fr.start < w.end && fr.end > w.end {
                // Starts inside, runs past the window: truncate the end.
                out.push(slot(label_date, &weekday, add_minutes(fr.start, buffer), w.end));
                continue;
            }
            if fr.start <= w.start && fr.end > w.end {
                // Free range swallows the whole window: emit it unbuffered.
                out.push(slot(label_date, &weekday, w.start, w.end));
            }
        }
    }
    Ok(out)
}

/// Complement of sorted, non-overlapping booked ranges across the day
/// window `[00:00:00, 23:59:59]`.
pub fn free_ranges(booked_sorted: &[TimeRange]) -> Vec<TimeRange> {
    let day_start = NaiveTime::MIN;
    let day_end = NaiveTime::from_hms_opt(23, 59, 59).unwrap();

    if booked_sorted.is_empty() {
        return vec![TimeRange::new(day_start, day_end)];
    }

    let mut free = Vec::new();
    if booked_sorted[0].start > day_start {
        free.push(TimeRange::new(day_start, booked_sorted[0].start));
    }
    for pair in booked_sorted.windows(2) {
        if pair[1].start > pair[0].end {
            free.push(TimeRange::new(pair[0].end, pair[1].start));
        }
    }
    let last = booked_sorted.last().unwrap();
    if last.end < day_end {
        free.push(TimeRange::new(last.end, day_end));
    }
    free
}
