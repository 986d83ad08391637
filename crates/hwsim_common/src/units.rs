//! Time units, expressed in femtoseconds.

/// Femtoseconds per picosecond.
pub const FS_PER_PS: u64 = 1_000;
/// Femtoseconds per nanosecond.
pub const FS_PER_NS: u64 = 1_000 * FS_PER_PS;
/// Femtoseconds per microsecond.
pub const FS_PER_US: u64 = 1_000 * FS_PER_NS;
/// Femtoseconds per millisecond.
pub const FS_PER_MS: u64 = 1_000 * FS_PER_US;
/// Femtoseconds per second.
pub const FS_PER_S: u64 = 1_000 * FS_PER_MS;
