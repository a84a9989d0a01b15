//! Core types for the peer directory

pub mod record;

pub use record::{is_routable, resolve_merge, MergeOutcome, MergeReport, NodeRecord, Resolution};

/// Milliseconds since the Unix epoch
pub type Timestamp = u64;

/// Sentinel address for a peer whose location is not known
pub const UNKNOWN_ADDRESS: &str = "0.0.0.0";

/// Port assumed when a record does not carry one
pub const DEFAULT_PORT: u16 = 8888;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Convert a `Duration` to a millisecond offset, saturating
pub fn duration_millis(duration: std::time::Duration) -> Timestamp {
    duration.as_millis().min(Timestamp::MAX as u128) as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01 in milliseconds
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_duration_millis() {
        assert_eq!(duration_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(duration_millis(Duration::MAX), Timestamp::MAX);
    }
}
