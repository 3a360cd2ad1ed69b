use chrono::NaiveDate;

/// Rooms a single property may hold.
pub const MAX_ROOMS_PER_PROPERTY: usize = 10_000;

/// Reservations (any status) kept on one room.
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Reservations waiting for a room assignment.
pub const MAX_UNASSIGNED_RESERVATIONS: usize = 100_000;

/// Longest stay accepted, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

/// Widest snapshot window, in days.
pub const MAX_WINDOW_DAYS: i64 = 3 * 366;

pub const MAX_ROOM_NUMBER_LEN: usize = 32;
pub const MAX_ROOM_TYPE_LEN: usize = 64;
pub const MAX_FLOOR_LEN: usize = 32;
pub const MAX_GUEST_NAME_LEN: usize = 256;

/// Moves committed in one batch.
pub const MAX_BATCH_SIZE: usize = 256;

pub const MAX_PROPERTIES: usize = 1_000;
pub const MAX_PROPERTY_NAME_LEN: usize = 128;

/// Earliest and latest calendar dates the rack accepts.
pub fn min_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

pub fn max_valid_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2100, 12, 31).unwrap_or(NaiveDate::MAX)
}
