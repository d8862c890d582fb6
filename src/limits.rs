use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// 31 days.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * 24 * 3_600_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_RESOURCE_KEY_LEN: usize = 128;
pub const MAX_BOOKINGS_PER_RESOURCE: usize = 100_000;

/// Buffered change-feed events per resource before slow subscribers lag.
pub const FEED_CHANNEL_CAPACITY: usize = 256;
