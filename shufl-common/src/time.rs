//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Hours elapsed between `earlier` and `now`, as a float.
///
/// Negative when `earlier` lies in the future (clock skew between writers).
pub fn hours_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - earlier).num_milliseconds() as f64 / 3_600_000.0
}

/// True when `refreshed_at` is older than `threshold` relative to `now`
pub fn is_older_than(refreshed_at: DateTime<Utc>, threshold: Duration, now: DateTime<Utc>) -> bool {
    now - refreshed_at > threshold
}

/// Convert whole hours into a chrono duration
pub fn hours(value: u64) -> Duration {
    Duration::hours(value as i64)
}
