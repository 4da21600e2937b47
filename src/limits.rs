/// Minutes in a day. Clock times live in `[0, MINUTES_PER_DAY)`.
pub const MINUTES_PER_DAY: u16 = 24 * 60;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_GROUP_CAPACITY: u32 = 200;
pub const MAX_AVAILABILITY_WINDOWS: usize = 256;
pub const MAX_SLOTS_PER_DAY: usize = 1440;
/// Widest week-style query, in days.
pub const DAYS_PER_WEEK: u64 = 7;
/// Maximum bytes in a single wire request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;
