//! Trait definitions for the store abstraction

use crate::keyspace::{KeyDomain, INPUT_PREFIX, OUTPUT_PREFIX};
use crate::value::{SensorValue, StoredValue};
use anyhow::Result;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;

/// Sensor store trait
///
/// The evaluation core only needs three things from its backing store:
/// a snapshot of current inputs, a sink for outputs, and a way to notify
/// subscribers. Primitive operations are required; the domain operations
/// have default implementations built on top of them.
///
/// Implementations:
/// - `MemoryRtdb`: in-memory backend for tests and embedded use
#[async_trait]
pub trait SensorStore: Send + Sync + 'static {
    // ========== Introspection ==========

    /// Allow downcasting to concrete types
    fn as_any(&self) -> &dyn Any;

    // ========== Primitive Operations ==========

    /// Get value (with write timestamp) by full key
    async fn get_value(&self, key: &str) -> Result<Option<StoredValue>>;

    /// Set value for full key, stamped with the store's clock
    async fn set_value(&self, key: &str, value: SensorValue) -> Result<()>;

    /// Delete key
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All entries whose key starts with `prefix`, keyed by full key
    async fn scan_prefix(&self, prefix: &str) -> Result<HashMap<String, StoredValue>>;

    /// Publish message to channel
    ///
    /// Returns the number of subscribers that received the message.
    async fn publish(&self, channel: &str, message: &str) -> Result<u32>;

    /// Drop every key
    async fn clear(&self) -> Result<()>;

    // ========== Domain Operations (with default implementations) ==========

    /// Current input snapshot with the `input:` prefix stripped
    async fn get_all_inputs(&self) -> Result<HashMap<String, SensorValue>> {
        Ok(strip_domain(self.scan_prefix(INPUT_PREFIX).await?, INPUT_PREFIX))
    }

    /// Outputs written by earlier cycles, `output:` prefix stripped
    async fn get_all_outputs(&self) -> Result<HashMap<String, SensorValue>> {
        Ok(strip_domain(
            self.scan_prefix(OUTPUT_PREFIX).await?,
            OUTPUT_PREFIX,
        ))
    }

    /// Write one input reading
    async fn set_input(&self, name: &str, value: SensorValue) -> Result<()> {
        self.set_value(&KeyDomain::Input.key(name), value).await
    }

    /// Write the full output set of one cycle
    async fn set_outputs(&self, outputs: &HashMap<String, SensorValue>) -> Result<()> {
        for (name, value) in outputs {
            self.set_value(&KeyDomain::Output.key(name), value.clone())
                .await?;
        }
        Ok(())
    }
}

fn strip_domain(
    entries: HashMap<String, StoredValue>,
    prefix: &str,
) -> HashMap<String, SensorValue> {
    entries
        .into_iter()
        .filter_map(|(key, stored)| {
            key.strip_prefix(prefix)
                .map(|name| (name.to_string(), stored.value))
        })
        .collect()
}
