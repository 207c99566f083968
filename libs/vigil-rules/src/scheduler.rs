//! Rule Scheduler - fixed-interval cycle driver
//!
//! Calls `Coordinator::run_cycle` on every tick until stopped. A failed
//! cycle is logged and the next tick retries; cycle timeouts belong to
//! whoever owns the scheduler task.

use crate::coordinator::Coordinator;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Scheduler status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub rule_count: usize,
    pub layer_count: usize,
    pub tick_interval_ms: u64,
    pub cycles_run: u64,
    pub cycles_failed: u64,
}

pub struct RuleScheduler {
    coordinator: Arc<Coordinator>,
    /// Shutdown signal
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
    tick_ms: u64,
    cycles_run: AtomicU64,
    cycles_failed: AtomicU64,
}

impl RuleScheduler {
    pub fn new(coordinator: Arc<Coordinator>, tick_ms: u64) -> Self {
        Self {
            coordinator,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            tick_ms: tick_ms.max(1),
            cycles_run: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
        }
    }

    /// Tick period taken from the coordinator's config
    pub fn from_config(coordinator: Arc<Coordinator>) -> Self {
        let tick_ms = coordinator.config().tick_ms;
        Self::new(coordinator, tick_ms)
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Start the scheduler loop
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }
        info!("Starting rule scheduler with {}ms tick", self.tick_ms);

        let mut tick_interval = interval(Duration::from_millis(self.tick_ms));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.tick().await;
                }
                _ = self.shutdown.notified() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Rule scheduler stopped");
    }

    /// Stop the scheduler; a no-op when the loop is not running
    pub fn stop(&self) {
        if !self.is_running() {
            debug!("Scheduler not running, nothing to stop");
            return;
        }
        info!("Stopping rule scheduler...");
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn tick(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        match self.coordinator.run_cycle().await {
            Ok(report) => {
                if report.errors > 0 {
                    warn!(
                        "Cycle {}: {} rule errors",
                        report.cycle_id, report.errors
                    );
                } else {
                    debug!("Cycle {} ok ({}us)", report.cycle_id, report.duration_us);
                }
            },
            Err(e) => {
                self.cycles_failed.fetch_add(1, Ordering::Relaxed);
                error!("Scheduler tick error: {}", e);
            },
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let rules = self.coordinator.rules();
        SchedulerStatus {
            running: self.is_running(),
            rule_count: rules.rule_count(),
            layer_count: rules.layer_count(),
            tick_interval_ms: self.tick_ms,
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::types::{Action, ComparisonOp, Condition, RuleDefinition};
    use vigil_rtdb::helpers::create_manual_rtdb;
    use vigil_rtdb::{SensorStore, SensorValue};

    fn scheduler(tick_ms: u64) -> (Arc<RuleScheduler>, Arc<vigil_rtdb::MemoryRtdb>) {
        let (rtdb, clock) = create_manual_rtdb(0);
        let rules = vec![RuleDefinition::new(
            "hot",
            Condition::compare("temp", ComparisonOp::Gt, 50.0),
        )
        .with_action(Action::set("alarm", true))];
        let config = EngineConfig {
            tick_ms,
            ..EngineConfig::default()
        };
        let coordinator =
            Coordinator::from_definitions(&rules, rtdb.clone(), clock, config).unwrap();
        (
            Arc::new(RuleScheduler::from_config(Arc::new(coordinator))),
            rtdb,
        )
    }

    #[tokio::test]
    async fn test_runs_cycles_until_stopped() {
        let (scheduler, rtdb) = scheduler(5);
        rtdb.set_input("temp", SensorValue::Number(80.0)).await.unwrap();

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.start().await });

        for _ in 0..200 {
            if scheduler.status().cycles_run >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(scheduler.is_running());

        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let status = scheduler.status();
        assert!(!status.running);
        assert!(status.cycles_run >= 2);
        assert_eq!(status.cycles_failed, 0);
        assert_eq!(status.rule_count, 1);
        let outputs = rtdb.get_all_outputs().await.unwrap();
        assert_eq!(outputs["alarm"], SensorValue::Bool(true));
    }

    #[tokio::test]
    async fn test_stop_before_start_does_not_cancel_next_run() {
        let (scheduler, _rtdb) = scheduler(5);
        scheduler.stop();
        assert!(!scheduler.is_running());

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.start().await });
        for _ in 0..200 {
            if scheduler.status().cycles_run >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(scheduler.status().cycles_run >= 2);
        assert!(!handle.is_finished());

        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_failed_cycles_counted() {
        let (scheduler, rtdb) = scheduler(5);
        rtdb.set_offline(true);

        let runner = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move { runner.start().await });
        for _ in 0..200 {
            if scheduler.status().cycles_failed >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(scheduler.status().cycles_failed >= 2);
        assert_eq!(scheduler.coordinator().cycle_count(), scheduler.status().cycles_run);
    }
}
