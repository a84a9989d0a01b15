//! Per-source throttle for inbound gossip
//!
//! Fixed window: a payload from a source is accepted only if at least
//! `min_interval` has passed since the last *accepted* payload from that
//! source. Rejected payloads do not extend the window.
//!
//! Uses `tokio::time::Instant` so tests can drive the clock with paused time.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Map size above which entries outside the window are purged
const PURGE_THRESHOLD: usize = 1024;

pub struct RateLimiter {
    last_accepted: Mutex<HashMap<String, Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_accepted: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    /// Whether a payload from `source` should be processed now
    pub fn should_process(&self, source: &str) -> bool {
        self.should_process_at(source, Instant::now())
    }

    /// Same as [`should_process`](Self::should_process) with an explicit clock
    pub fn should_process_at(&self, source: &str, now: Instant) -> bool {
        let mut map = self.last_accepted.lock();

        if let Some(last) = map.get(source) {
            if now.saturating_duration_since(*last) < self.min_interval {
                return false;
            }
        }

        if map.len() >= PURGE_THRESHOLD {
            let window = self.min_interval;
            map.retain(|_, last| now.saturating_duration_since(*last) < window);
        }

        map.insert(source.to_string(), now);
        true
    }

    /// Number of sources currently remembered
    pub fn tracked_sources(&self) -> usize {
        self.last_accepted.lock().len()
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn test_second_message_inside_window_is_dropped() {
        let limiter = RateLimiter::new(WINDOW);
        let t0 = Instant::now();

        assert!(limiter.should_process_at("A", t0));
        assert!(!limiter.should_process_at("A", t0 + Duration::from_secs(10)));
        assert!(limiter.should_process_at("A", t0 + WINDOW));
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let limiter = RateLimiter::new(WINDOW);
        let t0 = Instant::now();

        assert!(limiter.should_process_at("A", t0));
        assert!(!limiter.should_process_at("A", t0 + Duration::from_secs(29)));
        assert!(limiter.should_process_at("A", t0 + Duration::from_secs(31)));
    }

    #[test]
    fn test_sources_are_independent() {
        let limiter = RateLimiter::new(WINDOW);
        let t0 = Instant::now();

        assert!(limiter.should_process_at("A", t0));
        assert!(limiter.should_process_at("B", t0));
        assert!(!limiter.should_process_at("A", t0));
        assert_eq!(limiter.tracked_sources(), 2);
    }

    #[test]
    fn test_purge_keeps_map_bounded() {
        let limiter = RateLimiter::new(WINDOW);
        let t0 = Instant::now();

        for i in 0..PURGE_THRESHOLD {
            assert!(limiter.should_process_at(&format!("peer-{}", i), t0));
        }
        assert_eq!(limiter.tracked_sources(), PURGE_THRESHOLD);

        let later = t0 + WINDOW + Duration::from_secs(1);
        assert!(limiter.should_process_at("late", later));
        assert_eq!(limiter.tracked_sources(), 1);
    }

    #[test]
    fn test_purge_preserves_sources_inside_window() {
        let limiter = RateLimiter::new(WINDOW);
        let t0 = Instant::now();

        for i in 0..PURGE_THRESHOLD {
            limiter.should_process_at(&format!("peer-{}", i), t0);
        }
        assert!(limiter.should_process_at("late", t0 + Duration::from_secs(1)));
        assert!(!limiter.should_process_at("peer-0", t0 + Duration::from_secs(2)));
    }
}
