//! In-memory store implementation
//!
//! Uses DashMap for sharded concurrent access. Pub/sub is backed by one
//! tokio broadcast channel per channel name, created on first subscribe.

use crate::error::RtdbError;
use crate::time::{SystemTimeProvider, TimeProvider};
use crate::traits::SensorStore;
use crate::value::{SensorValue, StoredValue};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Per-channel broadcast buffer size
const CHANNEL_CAPACITY: usize = 256;

/// In-memory store with concurrent access support
pub struct MemoryRtdb {
    values: Arc<DashMap<String, StoredValue>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
    clock: Arc<dyn TimeProvider>,
    offline: AtomicBool,
}

impl MemoryRtdb {
    /// Create new in-memory store stamped with the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemTimeProvider))
    }

    /// Create in-memory store stamped with the given clock
    pub fn with_clock(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            values: Arc::new(DashMap::new()),
            channels: Arc::new(DashMap::new()),
            clock,
            offline: AtomicBool::new(false),
        }
    }

    /// Insert a value with an explicit timestamp
    pub fn insert_with_timestamp(&self, key: &str, value: SensorValue, timestamp_ms: i64) {
        self.values.insert(
            key.to_string(),
            StoredValue {
                value,
                timestamp_ms,
            },
        );
    }

    /// Subscribe to a pub/sub channel
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Simulate a backend outage; every operation fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Clear all data (useful for testing)
    pub fn clear_all(&self) {
        self.values.clear();
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            value_count: self.values.len(),
            channel_count: self.channels.len(),
        }
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RtdbError::ConnectionError("memory store offline".to_string()).into());
        }
        Ok(())
    }
}

impl Default for MemoryRtdb {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory store usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub value_count: usize,
    pub channel_count: usize,
}

#[async_trait]
impl SensorStore for MemoryRtdb {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    async fn get_value(&self, key: &str) -> Result<Option<StoredValue>> {
        self.ensure_online()?;
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set_value(&self, key: &str, value: SensorValue) -> Result<()> {
        self.ensure_online()?;
        let timestamp_ms = self.clock.now_millis();
        self.insert_with_timestamp(key, value, timestamp_ms);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_online()?;
        Ok(self.values.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<HashMap<String, StoredValue>> {
        self.ensure_online()?;
        Ok(self
            .values
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        self.ensure_online()?;
        let receivers = match self.channels.get(channel) {
            // send() only fails when nobody is listening
            Some(sender) => sender.send(message.to_string()).unwrap_or(0),
            None => 0,
        };
        tracing::trace!("publish {} -> {} receivers", channel, receivers);
        Ok(receivers as u32)
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_online()?;
        self.clear_all();
        Ok(())
    }
}
