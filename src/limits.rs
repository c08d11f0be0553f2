use crate::model::Ms;

pub const MAX_FIELDS: usize = 10_000;
pub const MAX_BOOKINGS_PER_FIELD: usize = 200_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 1_000;

/// Slot size bounds for availability grids, in minutes.
pub const MIN_SLOT_MINUTES: u32 = 5;
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;

/// Upper bound on days returned by one availability range query.
pub const MAX_AVAILABILITY_DAYS: u32 = 62;

/// 2000-01-01T00:00:00Z .. 2200-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
