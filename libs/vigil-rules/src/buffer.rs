//! Fixed-capacity per-sensor time series
//!
//! A circular array of `(timestamp, value)` pairs with a write cursor and
//! a count. Once full, each insert evicts the oldest entry. The buffer
//! never reads a clock; every time-relative query takes `now_ms`.

use crate::types::ComparisonOp;
use serde::{Deserialize, Serialize};

/// Default capacity for new buffers
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// One buffered reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimestampedValue {
    pub timestamp_ms: i64,
    pub value: f64,
}

impl TimestampedValue {
    pub fn new(value: f64, timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// Ring buffer of readings for one sensor key
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    /// Circular storage
    entries: Vec<TimestampedValue>,
    /// Next write position
    position: usize,
    /// Number of stored entries (saturates at capacity)
    count: usize,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![TimestampedValue::default(); capacity.max(1)],
            position: 0,
            count: 0,
        }
    }

    /// Insert at the cursor, evicting the oldest entry when full
    pub fn add(&mut self, value: f64, timestamp_ms: i64) {
        self.entries[self.position] = TimestampedValue::new(value, timestamp_ms);
        self.position = (self.position + 1) % self.entries.len();
        if self.count < self.entries.len() {
            self.count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Empty the buffer; capacity is unchanged
    pub fn clear(&mut self) {
        self.position = 0;
        self.count = 0;
    }

    /// Most recently inserted reading
    pub fn latest(&self) -> Option<TimestampedValue> {
        if self.count == 0 {
            return None;
        }
        let cap = self.entries.len();
        Some(self.entries[(self.position + cap - 1) % cap])
    }

    /// Stored entries in insertion order, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &TimestampedValue> {
        let cap = self.entries.len();
        let start = (self.position + cap - self.count) % cap;
        (0..self.count).map(move |i| &self.entries[(start + i) % cap])
    }

    /// Copy of the stored entries, oldest first
    pub fn snapshot(&self) -> Vec<TimestampedValue> {
        self.iter().copied().collect()
    }

    /// Entries with `timestamp ∈ [now - duration, now]`, ordered by timestamp
    ///
    /// With `include_guard`, the latest entry older than the window start is
    /// prepended.
    pub fn values_in_window(
        &self,
        duration_ms: u64,
        include_guard: bool,
        now_ms: i64,
    ) -> Vec<TimestampedValue> {
        let cutoff = now_ms.saturating_sub(duration_as_ms(duration_ms));

        let mut window: Vec<TimestampedValue> = self
            .iter()
            .filter(|e| e.timestamp_ms >= cutoff && e.timestamp_ms <= now_ms)
            .copied()
            .collect();
        // Stable: equal timestamps keep insertion order
        window.sort_by_key(|e| e.timestamp_ms);

        if include_guard {
            let mut guard: Option<TimestampedValue> = None;
            for e in self.iter().filter(|e| e.timestamp_ms < cutoff) {
                if guard.map_or(true, |g| e.timestamp_ms >= g.timestamp_ms) {
                    guard = Some(*e);
                }
            }
            if let Some(g) = guard {
                window.insert(0, g);
            }
        }

        window
    }

    /// Has `value <op> threshold` held for `duration_ms`
    ///
    /// Strict mode (`extend_last_known = false`) looks at the window ending
    /// now plus its guard; it needs at least two points and every one of
    /// them, guard included, must satisfy the comparison. Extended mode only
    /// checks the last reading and how long ago it arrived.
    pub fn holds_for_duration(
        &self,
        op: ComparisonOp,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
        now_ms: i64,
    ) -> bool {
        if self.is_empty() {
            return false;
        }

        if extend_last_known {
            return match self.latest() {
                Some(last) => {
                    let elapsed = now_ms.saturating_sub(last.timestamp_ms);
                    op.compare(last.value, threshold) && elapsed >= duration_as_ms(duration_ms)
                },
                None => false,
            };
        }

        let points = self.values_in_window(duration_ms, true, now_ms);
        if points.len() < 2 {
            return false;
        }
        points.iter().all(|p| op.compare(p.value, threshold))
    }

    pub fn is_above_for_duration(
        &self,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
        now_ms: i64,
    ) -> bool {
        self.holds_for_duration(
            ComparisonOp::Gt,
            threshold,
            duration_ms,
            extend_last_known,
            now_ms,
        )
    }

    pub fn is_below_for_duration(
        &self,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
        now_ms: i64,
    ) -> bool {
        self.holds_for_duration(
            ComparisonOp::Lt,
            threshold,
            duration_ms,
            extend_last_known,
            now_ms,
        )
    }
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

/// Durations past `i64::MAX` saturate instead of wrapping negative
pub(crate) fn duration_as_ms(duration_ms: u64) -> i64 {
    i64::try_from(duration_ms).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    const T: i64 = 100_000;

    fn values(points: &[TimestampedValue]) -> Vec<f64> {
        points.iter().map(|p| p.value).collect()
    }

    #[test]
    fn test_ring_eviction_keeps_last_n() {
        let mut buf = TimeSeriesBuffer::new(3);
        for i in 0..5 {
            buf.add(i as f64, i * 10);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.capacity(), 3);
        assert_eq!(values(&buf.snapshot()), vec![2.0, 3.0, 4.0]);
        assert_eq!(buf.latest().unwrap().value, 4.0);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf = TimeSeriesBuffer::new(4);
        buf.add(1.0, 1);
        buf.clear();
        assert!(buf.is_empty());
        assert!(buf.latest().is_none());
        assert_eq!(buf.capacity(), 4);
        buf.add(2.0, 2);
        assert_eq!(values(&buf.snapshot()), vec![2.0]);
    }

    #[test]
    fn test_window_is_inclusive_and_sorted() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(3.0, T - 1_000);
        buf.add(1.0, T - 4_000);
        buf.add(2.0, T - 2_000);
        buf.add(0.0, T - 5_000);
        buf.add(9.0, T + 1);

        let window = buf.values_in_window(4_000, false, T);
        assert_eq!(values(&window), vec![1.0, 2.0, 3.0]);

        let guarded = buf.values_in_window(4_000, true, T);
        assert_eq!(values(&guarded), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_guard_is_latest_before_cutoff() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(7.0, T - 9_000);
        buf.add(8.0, T - 6_000);
        buf.add(6.0, T - 8_000);

        let guarded = buf.values_in_window(4_000, true, T);
        assert_eq!(guarded.len(), 1);
        assert_eq!(guarded[0].timestamp_ms, T - 6_000);
    }

    #[test]
    fn test_empty_buffer_is_false() {
        let buf = TimeSeriesBuffer::new(5);
        assert!(!buf.is_above_for_duration(0.0, 0, false, T));
        assert!(!buf.is_above_for_duration(0.0, 0, true, T));
        assert!(!buf.is_below_for_duration(0.0, 0, true, T));
    }

    #[test]
    fn test_strict_guard_sensitivity() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(25.0, T - 6_000);
        buf.add(60.0, T - 4_000);
        buf.add(65.0, T - 2_000);
        assert!(!buf.is_above_for_duration(50.0, 4_000, false, T));

        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(55.0, T - 6_000);
        buf.add(60.0, T - 4_000);
        buf.add(65.0, T - 2_000);
        assert!(buf.is_above_for_duration(50.0, 4_000, false, T));
    }

    #[test]
    fn test_extended_persistence() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(60.0, T - 12_000);
        assert!(buf.is_above_for_duration(50.0, 10_000, true, T));
        assert!(!buf.is_above_for_duration(50.0, 10_000, false, T));
        // Not long enough yet
        assert!(!buf.is_above_for_duration(50.0, 10_000, true, T - 3_000));
    }

    #[test]
    fn test_oversized_duration_never_held() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(60.0, 1_000);
        assert!(!buf.is_above_for_duration(50.0, u64::MAX, true, 1_000));
        assert!(!buf.is_above_for_duration(50.0, u64::MAX, true, i64::MAX));

        buf.add(70.0, 2_000);
        // The whole history fits in the window and there is no guard
        assert_eq!(buf.values_in_window(u64::MAX, true, 2_000).len(), 2);
        assert!(buf.is_above_for_duration(50.0, u64::MAX, false, 2_000));
        assert_eq!(duration_as_ms(u64::MAX), i64::MAX);
        assert_eq!(duration_as_ms(4_000), 4_000);
    }

    #[test]
    fn test_extended_ignores_earlier_violations() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(10.0, T - 20_000);
        buf.add(60.0, T - 12_000);
        assert!(buf.is_above_for_duration(50.0, 10_000, true, T));
    }

    #[test]
    fn test_strict_below() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(4.0, T - 5_000);
        buf.add(3.0, T - 3_000);
        buf.add(2.0, T);
        assert!(buf.is_below_for_duration(5.0, 4_000, false, T));
        assert!(!buf.is_below_for_duration(3.5, 4_000, false, T));
    }

    #[test]
    fn test_holds_for_duration_inclusive_operator() {
        let mut buf = TimeSeriesBuffer::new(10);
        buf.add(50.0, T - 5_000);
        buf.add(50.0, T - 1_000);
        assert!(!buf.is_above_for_duration(50.0, 4_000, false, T));
        assert!(buf.holds_for_duration(ComparisonOp::Ge, 50.0, 4_000, false, T));
    }
}
