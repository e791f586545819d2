//! Time utilities for burrow
//!
//! Timestamps coming from the control plane are signed epoch milliseconds,
//! so the helpers here work in `i64`.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Get the current Unix timestamp in seconds.
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Milliseconds elapsed between `since` and `now`, or 0 if `since` is later.
pub fn elapsed_millis_at(since: i64, now: i64) -> i64 {
    now.saturating_sub(since).max(0)
}
