//! Input bounds enforced at the engine's mutation entry points.

pub const MAX_VENUES: usize = 1_000;
pub const MAX_ROOMS_PER_VENUE: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_FIELD_LEN: usize = 255;
pub const MAX_DESC_LEN: usize = 4_096;

/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest window a single materialization run will cover.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 366;

/// Stay dates outside this year range are rejected as garbage input.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;
