//! Hard caps protecting the server from unbounded growth. All are generous
//! for a single facility; raise them before pointing a city at this.

pub const MAX_COURTS: usize = 10_000;
pub const MAX_ACCOUNTS: usize = 100_000;
pub const MAX_EQUIPMENT: usize = 10_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 100;

pub const MAX_BOOKINGS_PER_COURT: usize = 10_000;
pub const MAX_WORKERS_PER_COURT: usize = 100;
pub const MAX_SLOTS_PER_COURT: usize = 500;

/// Bookings are whole hours; a day is the longest sensible slot.
pub const MAX_DURATION_HOURS: i64 = 24;
pub const MAX_BUFFER_MINUTES: i64 = 24 * 60;

/// Wire protocol line cap — one JSON object per line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
pub const MAX_SUBS_PER_CONNECTION: usize = 256;
