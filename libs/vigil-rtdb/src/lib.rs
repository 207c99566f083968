//! Vigil Realtime Store Abstraction
//!
//! Provides the interface the rule core uses to talk to its backing
//! key-value store, plus an in-memory backend.
//!
//! # Key Components
//!
//! - **SensorStore trait**: input snapshot provider, output sink, pub/sub
//! - **SensorValue**: closed scalar variant with coercion rules
//! - **TimeProvider**: injectable clock shared with the rule core

pub mod error;

pub mod keyspace;

pub mod memory_impl;

pub mod time;

pub mod traits;

pub mod value;

// Re-exports
pub use error::RtdbError;
pub use keyspace::{input_key, output_key, strip_prefix, KeyDomain};
pub use memory_impl::{MemoryRtdb, MemoryStats};
pub use time::{FixedTimeProvider, ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use traits::SensorStore;
pub use value::{SensorValue, StoredValue};

/// Helper functions for tests and embedders
pub mod helpers {
    use super::{ManualTimeProvider, MemoryRtdb, SensorStore};
    use std::sync::Arc;

    /// Create an in-memory store behind the trait object
    pub fn create_test_rtdb() -> Arc<dyn SensorStore> {
        Arc::new(MemoryRtdb::new())
    }

    /// Create a concrete in-memory store sharing a manual clock
    ///
    /// Returns the store and the clock so tests can advance time.
    pub fn create_manual_rtdb(start_ms: i64) -> (Arc<MemoryRtdb>, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(start_ms));
        let rtdb = Arc::new(MemoryRtdb::with_clock(clock.clone()));
        (rtdb, clock)
    }
}
