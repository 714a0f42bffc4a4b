//! Hard input limits. Anything past these is rejected as a validation error
//! before it can reach the WAL.

use crate::model::Ms;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_COLOR_LEN: usize = 64;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_CONTACT_LEN: usize = 320;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 3000-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 32_503_680_000_000;

/// A single booking may not run longer than a week.
pub const MAX_BOOKING_DURATION_MS: Ms = 7 * 24 * 3_600_000;

pub const MAX_EXTENSION_MINUTES: i64 = 24 * 60;
