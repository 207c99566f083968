//! Time provider abstraction
//!
//! Buffers, window trackers and the store never read the system clock
//! directly. They ask a `TimeProvider`, which lets tests drive time with
//! synthetic timestamps instead of sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Time provider trait for generating timestamps
///
/// Implementations:
/// - `SystemTimeProvider`: wall clock for production use
/// - `FixedTimeProvider`: frozen timestamp
/// - `ManualTimeProvider`: settable/advanceable clock for deterministic tests
pub trait TimeProvider: Send + Sync + 'static {
    /// Get current timestamp in milliseconds since Unix epoch
    fn now_millis(&self) -> i64;
}

/// System time provider using local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Fixed time provider for testing
///
/// Returns a predetermined timestamp, useful for deterministic tests.
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    timestamp_ms: i64,
}

impl FixedTimeProvider {
    /// Create a new fixed time provider with the given timestamp
    pub fn new(timestamp_ms: i64) -> Self {
        Self { timestamp_ms }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now_millis(&self) -> i64 {
        self.timestamp_ms
    }
}

/// Manually driven clock
///
/// Shared behind an `Arc` between the test and the component under test;
/// the test moves time forward with `advance()` or jumps with `set()`.
#[derive(Debug, Default)]
pub struct ManualTimeProvider {
    now_ms: AtomicI64,
}

impl ManualTimeProvider {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, timestamp_ms: i64) {
        self.now_ms.store(timestamp_ms, Ordering::SeqCst);
    }

    /// Move forward by `delta_ms`, returning the new time
    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_provider() {
        let provider = SystemTimeProvider;
        let time1 = provider.now_millis();
        let time2 = provider.now_millis();

        assert!(time1 > 1_600_000_000_000);
        assert!(time2 >= time1);
    }

    #[test]
    fn test_fixed_time_provider() {
        let fixed_time = 1700000000000_i64;
        let provider = FixedTimeProvider::new(fixed_time);

        assert_eq!(provider.now_millis(), fixed_time);
        assert_eq!(provider.now_millis(), fixed_time); // Always returns same value
    }

    #[test]
    fn test_manual_time_provider() {
        let clock = ManualTimeProvider::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);

        assert_eq!(clock.advance(2_500), 3_500);
        assert_eq!(clock.now_millis(), 3_500);

        clock.set(10);
        assert_eq!(clock.now_millis(), 10);
    }
}
