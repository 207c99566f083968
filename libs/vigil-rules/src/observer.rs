//! Cycle observability side-channel
//!
//! The coordinator broadcasts one `CycleEvent` per cycle. `MetricsObserver`
//! consumes them on its own task and keeps running totals; it never
//! touches buffers or trackers, so a slow observer cannot stall a cycle.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Event capacity of the coordinator's broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
    Completed {
        cycle_id: u64,
        duration_us: u64,
        /// Rules executed
        rules: usize,
        /// Rules that failed
        errors: usize,
        /// Output keys written
        outputs: usize,
    },
    Failed {
        cycle_id: u64,
        reason: String,
    },
}

impl CycleEvent {
    pub fn cycle_id(&self) -> u64 {
        match self {
            CycleEvent::Completed { cycle_id, .. } | CycleEvent::Failed { cycle_id, .. } => {
                *cycle_id
            },
        }
    }
}

/// Running totals over observed cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub rule_errors: u64,
    pub last_cycle_us: u64,
    pub max_cycle_us: u64,
}

impl EngineMetrics {
    pub fn record(&mut self, event: &CycleEvent) {
        match event {
            CycleEvent::Completed {
                duration_us,
                errors,
                ..
            } => {
                self.cycles += 1;
                self.rule_errors += *errors as u64;
                self.last_cycle_us = *duration_us;
                self.max_cycle_us = self.max_cycle_us.max(*duration_us);
            },
            CycleEvent::Failed { .. } => {
                self.failed_cycles += 1;
            },
        }
    }
}

pub struct MetricsObserver {
    metrics: Arc<RwLock<EngineMetrics>>,
    handle: JoinHandle<()>,
}

impl MetricsObserver {
    /// Start aggregating on a background task; ends when the sender drops
    pub fn spawn(mut receiver: broadcast::Receiver<CycleEvent>) -> Self {
        let metrics = Arc::new(RwLock::new(EngineMetrics::default()));
        let sink = Arc::clone(&metrics);

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => sink.write().record(&event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Metrics observer lagged, {} events dropped", missed);
                    },
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Metrics observer stopped");
        });

        Self { metrics, handle }
    }

    pub fn snapshot(&self) -> EngineMetrics {
        self.metrics.read().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }
}
