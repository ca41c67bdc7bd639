//! # Utility Functions
//!
//! Timestamp helpers shared by the proximity worker and the replication client.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// All motion vectors and proximity result timestamps use this clock. A
/// system clock set before the Unix epoch yields zero rather than panicking.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Converts a millisecond setting into a `Duration`.
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_timestamp_is_millis() {
        let a = current_timestamp();
        // Past 2020-01-01 in milliseconds.
        assert!(a > 1_577_836_800_000);
        assert!(current_timestamp() >= a);
    }
}
