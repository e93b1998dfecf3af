//! Timestamp utilities
//!
//! Media timestamps are carried as signed microseconds (`i64`), matching the
//! resolution used by the Media Clock. Negative values are reserved to mean
//! "unset" in a few places and are never valid presentation times.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Microseconds per millisecond
pub const US_PER_MS: i64 = 1_000;

/// Microseconds per second
pub const US_PER_SEC: i64 = 1_000_000;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to microseconds
pub fn ms_to_us(ms: i64) -> i64 {
    ms.saturating_mul(US_PER_MS)
}

/// Convert microseconds to milliseconds (truncating)
pub fn us_to_ms(us: i64) -> i64 {
    us / US_PER_MS
}

/// Convert a non-negative microsecond delay to a `Duration`.
///
/// Negative delays clamp to zero.
pub fn us_to_duration(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

/// Convert a frame count at `sample_rate` to microseconds
pub fn frames_to_us(frames: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    ((frames as u128 * US_PER_SEC as u128) / sample_rate as u128) as i64
}

/// Convert microseconds to a frame count at `sample_rate` (truncating)
pub fn us_to_frames(us: i64, sample_rate: u32) -> u64 {
    if us <= 0 {
        return 0;
    }
    ((us as u128 * sample_rate as u128) / US_PER_SEC as u128) as u64
}
