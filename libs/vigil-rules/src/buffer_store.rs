//! Per-sensor buffer registry
//!
//! One `TimeSeriesBuffer` per sensor key, created on first write. The map
//! is a sharded `DashMap`; each buffer sits behind its own `RwLock` so
//! readers and writers of unrelated sensors never contend. Lookups clone
//! the buffer's `Arc` and release the shard before taking the buffer lock.

use crate::buffer::{TimeSeriesBuffer, TimestampedValue, DEFAULT_BUFFER_CAPACITY};
use crate::types::ComparisonOp;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use vigil_rtdb::{SystemTimeProvider, TimeProvider};

pub struct BufferStore {
    buffers: DashMap<String, Arc<RwLock<TimeSeriesBuffer>>>,
    capacity: usize,
    clock: Arc<dyn TimeProvider>,
}

impl BufferStore {
    pub fn new(capacity: usize, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of sensors with a buffer
    pub fn sensor_count(&self) -> usize {
        self.buffers.len()
    }

    fn buffer(&self, key: &str) -> Option<Arc<RwLock<TimeSeriesBuffer>>> {
        self.buffers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn buffer_or_create(&self, key: &str) -> Arc<RwLock<TimeSeriesBuffer>> {
        if let Some(buf) = self.buffer(key) {
            return buf;
        }
        let capacity = self.capacity;
        Arc::clone(
            self.buffers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(TimeSeriesBuffer::new(capacity))))
                .value(),
        )
    }

    /// Append one reading
    pub fn update(&self, key: &str, value: f64, timestamp_ms: i64) {
        self.buffer_or_create(key).write().add(value, timestamp_ms);
    }

    /// Append one reading per key
    pub fn update_many(&self, values: &HashMap<String, (f64, i64)>) {
        for (key, (value, timestamp_ms)) in values {
            self.update(key, *value, *timestamp_ms);
        }
    }

    pub fn latest(&self, key: &str) -> Option<TimestampedValue> {
        self.buffer(key).and_then(|buf| buf.read().latest())
    }

    /// Windowed read relative to the store clock; unknown keys yield nothing
    pub fn query(&self, key: &str, duration_ms: u64, include_guard: bool) -> Vec<TimestampedValue> {
        let now_ms = self.clock.now_millis();
        match self.buffer(key) {
            Some(buf) => buf
                .read()
                .values_in_window(duration_ms, include_guard, now_ms),
            None => Vec::new(),
        }
    }

    pub fn holds_for_duration(
        &self,
        key: &str,
        op: ComparisonOp,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
    ) -> bool {
        let now_ms = self.clock.now_millis();
        self.holds_for_duration_at(key, op, threshold, duration_ms, extend_last_known, now_ms)
    }

    /// Same as `holds_for_duration` with an explicit evaluation time
    pub fn holds_for_duration_at(
        &self,
        key: &str,
        op: ComparisonOp,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
        now_ms: i64,
    ) -> bool {
        match self.buffer(key) {
            Some(buf) => {
                buf.read()
                    .holds_for_duration(op, threshold, duration_ms, extend_last_known, now_ms)
            },
            None => false,
        }
    }

    pub fn is_above(
        &self,
        key: &str,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
    ) -> bool {
        self.holds_for_duration(key, ComparisonOp::Gt, threshold, duration_ms, extend_last_known)
    }

    pub fn is_below(
        &self,
        key: &str,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
    ) -> bool {
        self.holds_for_duration(key, ComparisonOp::Lt, threshold, duration_ms, extend_last_known)
    }

    /// Drop every buffer
    pub fn clear_all(&self) {
        self.buffers.clear();
    }
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, Arc::new(SystemTimeProvider))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::thread;
    use vigil_rtdb::ManualTimeProvider;

    fn store_at(now: i64) -> (BufferStore, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(now));
        (BufferStore::new(16, clock.clone()), clock)
    }

    #[test]
    fn test_unknown_key_defaults() {
        let (store, _) = store_at(10_000);
        assert!(store.query("missing", 1_000, true).is_empty());
        assert!(!store.is_above("missing", 0.0, 0, true));
        assert!(store.latest("missing").is_none());
        assert_eq!(store.sensor_count(), 0);
    }

    #[test]
    fn test_update_many_creates_buffers() {
        let (store, clock) = store_at(10_000);
        let mut snapshot = HashMap::new();
        snapshot.insert("temp".to_string(), (55.0, 4_000));
        snapshot.insert("pressure".to_string(), (1.2, 4_000));
        store.update_many(&snapshot);
        snapshot.insert("temp".to_string(), (60.0, 8_000));
        store.update_many(&snapshot);

        assert_eq!(store.sensor_count(), 2);
        assert_eq!(store.latest("temp").unwrap().value, 60.0);
        assert_eq!(store.query("temp", 10_000, false).len(), 2);

        clock.set(9_000);
        assert!(store.is_above("temp", 50.0, 4_000, false));
        assert!(store.is_below("pressure", 2.0, 4_000, true));
    }

    #[test]
    fn test_clear_all() {
        let (store, _) = store_at(0);
        store.update("a", 1.0, 0);
        store.clear_all();
        assert_eq!(store.sensor_count(), 0);
        assert!(store.latest("a").is_none());
    }

    #[test]
    fn test_concurrent_writers_per_key() {
        let (store, _) = store_at(0);
        let store = Arc::new(store);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let key = format!("sensor_{}", t);
                    for i in 0..100 {
                        store.update(&key, i as f64, i);
                        let _ = store.query(&key, 50, true);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.sensor_count(), 4);
        for t in 0..4 {
            let latest = store.latest(&format!("sensor_{}", t)).unwrap();
            assert_eq!(latest.value, 99.0);
        }
    }
}
