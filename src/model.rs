use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Half-open time-of-day interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A confirmed reservation of a court by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub court_id: Uuid,
    pub account_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Whole hours; `end_time = start_time + duration`.
    pub duration: i64,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Half-open conflict test against a proposed `[start, end)`. A booking
    /// touching the proposal at either boundary does not conflict.
    pub fn blocks(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        (self.start_time <= start && start < self.end_time)
            || (self.start_time < end && end <= self.end_time)
    }

    /// Display form used in admin notices.
    pub fn summary(&self) -> String {
        format!("<Booking:{} | {} | {} hours>", self.id, self.start_time, self.duration)
    }
}

/// On-site staff attached to a court; receives cleaning reminders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// When an availability slot applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Recurs every week on this weekday.
    Weekly(Weekday),
    /// Applies on this calendar day. Matched by month and day; the year is
    /// not compared, so the override recurs annually.
    DateOverride(NaiveDate),
}

/// A window in which a court's schedule accepts bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub kind: SlotKind,
    pub opening: NaiveTime,
    pub closing: NaiveTime,
}

impl AvailabilitySlot {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match self.kind {
            SlotKind::Weekly(day) => day == date.weekday(),
            SlotKind::DateOverride(d) => d.month() == date.month() && d.day() == date.day(),
        }
    }
}

/// A registered player (or admin) identified by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Loanable gear tracked against the accounts currently borrowing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: Uuid,
    pub name: String,
    pub borrowers: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// All per-court state: identity, operating hours, staff, schedule windows
/// and the live booking list.
#[derive(Debug, Clone)]
pub struct CourtState {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub created_at: DateTime<Utc>,
    pub workers: Vec<Worker>,
    pub slots: Vec<AvailabilitySlot>,
    /// Sorted by `start_time`.
    pub bookings: Vec<Booking>,
}

impl CourtState {
    pub fn new(
        id: Uuid,
        name: String,
        location: String,
        open: NaiveTime,
        close: NaiveTime,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            location,
            open,
            close,
            created_at,
            workers: Vec::new(),
            slots: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert keeping the list sorted by start_time.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start_time, |b| b.start_time)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Uuid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Uuid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Time-of-day ranges of the bookings starting on `date`, in start
    /// order. A booking running past midnight is clamped to the day window.
    pub fn booked_ranges_on(&self, date: NaiveDate) -> Vec<TimeRange> {
        let day_end = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        self.bookings
            .iter()
            .filter(|b| b.start_time.date_naive() == date)
            .map(|b| {
                let start = b.start_time.time();
                let end = b.end_time.time();
                let end = if end <= start { day_end } else { end };
                TimeRange::new(start, end)
            })
            .collect()
    }

    /// Availability windows for `date`: matching weekly slots plus matching
    /// date overrides. A court with no slots at all falls back to its
    /// operating hours.
    pub fn day_windows(&self, date: NaiveDate) -> Vec<TimeRange> {
        if self.slots.is_empty() {
            return vec![TimeRange::new(self.open, self.close)];
        }
        self.slots
            .iter()
            .filter(|s| s.applies_on(date))
            .map(|s| TimeRange::new(s.opening, s.closing))
            .collect()
    }
}

/// The event types — flat, no nesting. This is the WAL record format and the
/// unit replayed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CourtCreated {
        id: Uuid,
        name: String,
        location: String,
        open: NaiveTime,
        close: NaiveTime,
        created_at: DateTime<Utc>,
    },
    CourtDeleted {
        id: Uuid,
    },
    WorkerAdded {
        id: Uuid,
        court_id: Uuid,
        name: String,
        email: String,
    },
    SlotAdded {
        id: Uuid,
        court_id: Uuid,
        kind: SlotKind,
        opening: NaiveTime,
        closing: NaiveTime,
    },
    SlotRemoved {
        id: Uuid,
        court_id: Uuid,
    },
    AccountRegistered {
        id: Uuid,
        email: String,
        first_name: String,
        last_name: String,
        is_admin: bool,
        created_at: DateTime<Utc>,
    },
    EquipmentCreated {
        id: Uuid,
        name: String,
        created_at: DateTime<Utc>,
    },
    EquipmentAssigned {
        id: Uuid,
        account_id: Uuid,
    },
    EquipmentReturned {
        id: Uuid,
        account_id: Uuid,
    },
    BookingCreated {
        id: Uuid,
        court_id: Uuid,
        account_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration: i64,
        created_at: DateTime<Utc>,
    },
    BookingRescheduled {
        id: Uuid,
        court_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration: i64,
    },
    BookingCancelled {
        id: Uuid,
        court_id: Uuid,
    },
}

/// The start/end pair broadcast to a court's subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTimes {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Real-time message fanned out to everyone subscribed to a court. The wire
/// form is `{"booked": {...}}` / `{"cancelled": {...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CourtBroadcast {
    #[serde(rename = "booked")]
    Booked(SlotTimes),
    #[serde(rename = "cancelled")]
    Cancelled(SlotTimes),
}

impl CourtBroadcast {
    pub fn booked(b: &Booking) -> Self {
        Self::Booked(SlotTimes { start_time: b.start_time, end_time: b.end_time })
    }

    pub fn cancelled(b: &Booking) -> Self {
        Self::Cancelled(SlotTimes { start_time: b.start_time, end_time: b.end_time })
    }
}
