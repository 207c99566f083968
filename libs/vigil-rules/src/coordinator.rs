//! Cycle coordinator
//!
//! One cycle:
//! 1. Fetch the input snapshot from the store
//! 2. Feed numeric inputs into the per-sensor buffers
//! 3. Fill in last cycle's outputs for keys the snapshot lacks
//! 4. Run layers in order, merging each layer's outputs before the next
//! 5. Publish outputs and queued notifications, then emit a `CycleEvent`
//!
//! Steps 2-4 are synchronous (`evaluate_snapshot`); only the store calls
//! in `run_cycle` await.

use crate::buffer_store::BufferStore;
use crate::condition::EvalContext;
use crate::config::EngineConfig;
use crate::error::{Result, RuleError};
use crate::group::{compile, Branch, CompiledRuleSet, RuleOutcome};
use crate::logger::{format_actions, format_values};
use crate::logic::EvalResult;
use crate::observer::{CycleEvent, EVENT_CHANNEL_CAPACITY};
use crate::types::RuleDefinition;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use vigil_rtdb::{SensorStore, SensorValue, TimeProvider};

/// Per-rule line of a cycle report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRunStat {
    pub rule: String,
    pub layer: usize,
    pub condition: String,
    pub verdict: Option<EvalResult>,
    pub branch: Option<Branch>,
    pub duration_us: u64,
    pub error: Option<String>,
}

/// Result of the synchronous part of a cycle
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub outputs: HashMap<String, SensorValue>,
    /// (channel, message) notifications in rule order
    pub publishes: Vec<(String, String)>,
    pub per_rule: Vec<RuleRunStat>,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub outputs: HashMap<String, SensorValue>,
    pub per_rule: Vec<RuleRunStat>,
    pub duration_us: u64,
    pub errors: usize,
}

/// Cumulative execution counters for one rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub executions: u64,
    pub primary_count: u64,
    pub else_count: u64,
    pub errors: u64,
    pub total_duration_us: u64,
}

impl RuleStats {
    fn record(&mut self, outcome: &RuleOutcome) {
        self.executions += 1;
        self.total_duration_us += outcome.duration_us;
        if outcome.is_error() {
            self.errors += 1;
        }
        match outcome.branch {
            Some(Branch::Primary) => self.primary_count += 1,
            Some(Branch::Else) => self.else_count += 1,
            None => {},
        }
    }
}

pub struct Coordinator {
    rules: CompiledRuleSet,
    store: Arc<dyn SensorStore>,
    clock: Arc<dyn TimeProvider>,
    buffers: BufferStore,
    config: EngineConfig,
    cycle_counter: AtomicU64,
    stats: Mutex<FxHashMap<String, RuleStats>>,
    events: broadcast::Sender<CycleEvent>,
}

impl Coordinator {
    pub fn new(
        rules: CompiledRuleSet,
        store: Arc<dyn SensorStore>,
        clock: Arc<dyn TimeProvider>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            buffers: BufferStore::new(config.buffer_capacity, Arc::clone(&clock)),
            rules,
            store,
            clock,
            config,
            cycle_counter: AtomicU64::new(0),
            stats: Mutex::new(FxHashMap::default()),
            events,
        }
    }

    /// Compile definitions and build a coordinator over them
    pub fn from_definitions(
        definitions: &[RuleDefinition],
        store: Arc<dyn SensorStore>,
        clock: Arc<dyn TimeProvider>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let rules = compile(definitions, &config)?;
        Ok(Self::new(rules, store, clock, config))
    }

    pub fn rules(&self) -> &CompiledRuleSet {
        &self.rules
    }

    pub fn buffers(&self) -> &BufferStore {
        &self.buffers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cycles started so far, failed ones included
    pub fn cycle_count(&self) -> u64 {
        self.cycle_counter.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.events.subscribe()
    }

    pub fn rule_stats(&self) -> HashMap<String, RuleStats> {
        self.stats
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Clear every window tracker and all buffers
    pub fn reset_temporal_state(&self) {
        self.rules.reset();
        self.buffers.clear_all();
        info!("Temporal state reset");
    }

    /// Steps 2-4 of a cycle against an explicit snapshot
    pub fn evaluate_snapshot(
        &self,
        inputs: &HashMap<String, SensorValue>,
        previous_outputs: &HashMap<String, SensorValue>,
        now_ms: i64,
    ) -> CycleOutcome {
        let numeric: HashMap<String, (f64, i64)> = inputs
            .iter()
            .filter_map(|(k, v)| v.as_number().map(|n| (k.clone(), (n, now_ms))))
            .collect();
        if numeric.len() < inputs.len() {
            debug!(
                "{} non-numeric inputs not buffered",
                inputs.len() - numeric.len()
            );
        }
        self.buffers.update_many(&numeric);

        let mut visible = inputs.clone();
        if self.config.merge_previous_outputs {
            for (key, value) in previous_outputs {
                visible
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }

        let mut outcome = CycleOutcome::default();
        for group in self.rules.groups() {
            let parallel =
                self.config.parallel_rules && group.len() >= self.config.parallel_min_rules;
            let ctx = EvalContext {
                inputs: &visible,
                buffers: &self.buffers,
                now_ms,
            };
            let results = group.execute(&ctx, parallel);

            let mut layer_outputs: Vec<(String, SensorValue)> = Vec::new();
            {
                let mut stats = self.stats.lock();
                for (rule, result) in group.rules().iter().zip(results.iter()) {
                    stats.entry(result.rule.clone()).or_default().record(result);

                    match &result.error {
                        Some(err) => {
                            outcome.errors += 1;
                            error!("Rule {} eval err: {}", result.rule, err);
                        },
                        None => {
                            debug!(
                                "{} | {} | {:?} | {}",
                                result.rule,
                                rule.condition_text(),
                                result.verdict,
                                format_actions(&result.outputs, None)
                            );
                        },
                    }

                    outcome.per_rule.push(RuleRunStat {
                        rule: result.rule.clone(),
                        layer: group.layer(),
                        condition: rule.condition_text().to_string(),
                        verdict: result.verdict,
                        branch: result.branch,
                        duration_us: result.duration_us,
                        error: result.error.as_ref().map(ToString::to_string),
                    });
                }
            }

            for result in results {
                if result.error.is_some() {
                    continue;
                }
                layer_outputs.extend(result.outputs);
                outcome.publishes.extend(result.publishes);
            }

            for (key, value) in layer_outputs {
                visible.insert(key.clone(), value.clone());
                outcome.outputs.insert(key, value);
            }
        }

        outcome
    }

    /// Run one full cycle against the store
    ///
    /// A failed fetch or publish abandons the cycle; the next call retries
    /// from scratch.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let cycle_id = self.cycle_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let start = Instant::now();

        let inputs = match self.store.get_all_inputs().await {
            Ok(v) => v,
            Err(e) => return Err(self.abandon(cycle_id, e.into())),
        };
        let previous = if self.config.merge_previous_outputs {
            match self.store.get_all_outputs().await {
                Ok(v) => v,
                Err(e) => return Err(self.abandon(cycle_id, e.into())),
            }
        } else {
            HashMap::new()
        };

        let now_ms = self.clock.now_millis();
        let outcome = self.evaluate_snapshot(&inputs, &previous, now_ms);

        if let Err(e) = self.publish(&outcome).await {
            return Err(self.abandon(cycle_id, e));
        }

        let duration_us = start.elapsed().as_micros() as u64;
        let _ = self.events.send(CycleEvent::Completed {
            cycle_id,
            duration_us,
            rules: outcome.per_rule.len(),
            errors: outcome.errors,
            outputs: outcome.outputs.len(),
        });
        debug!(
            "Cycle {} done in {}us: {}",
            cycle_id,
            duration_us,
            format_values(&outcome.outputs)
        );

        Ok(CycleReport {
            cycle_id,
            outputs: outcome.outputs,
            per_rule: outcome.per_rule,
            duration_us,
            errors: outcome.errors,
        })
    }

    async fn publish(&self, outcome: &CycleOutcome) -> Result<()> {
        self.store.set_outputs(&outcome.outputs).await?;

        for (channel, message) in &outcome.publishes {
            self.store.publish(channel, message).await?;
        }

        if !self.config.output_channel.is_empty() && !outcome.outputs.is_empty() {
            let payload = serde_json::to_string(&outcome.outputs)?;
            self.store
                .publish(&self.config.output_channel, &payload)
                .await?;
        }
        Ok(())
    }

    fn abandon(&self, cycle_id: u64, err: RuleError) -> RuleError {
        error!("Cycle {} abandoned: {}", cycle_id, err);
        let _ = self.events.send(CycleEvent::Failed {
            cycle_id,
            reason: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::types::{Action, ComparisonOp, Condition};
    use tracing_test::traced_test;
    use vigil_rtdb::helpers::create_manual_rtdb;
    use vigil_rtdb::MemoryRtdb;

    fn chain_rules() -> Vec<RuleDefinition> {
        vec![
            RuleDefinition::new("hot", Condition::compare("temp", ComparisonOp::Gt, 50.0))
                .with_action(Action::set("overheat", true))
                .with_else_action(Action::set("overheat", false)),
            RuleDefinition::new("fan", Condition::compare("overheat", ComparisonOp::Eq, true))
                .with_action(Action::set("fan_speed", 100.0))
                .with_else_action(Action::set("fan_speed", 0.0)),
        ]
    }

    fn coordinator(rules: &[RuleDefinition]) -> (Coordinator, Arc<MemoryRtdb>) {
        let (rtdb, clock) = create_manual_rtdb(1_000);
        let coordinator =
            Coordinator::from_definitions(rules, rtdb.clone(), clock, EngineConfig::default())
                .unwrap();
        (coordinator, rtdb)
    }

    #[test]
    fn test_layer_outputs_visible_to_next_layer() {
        let (coordinator, _) = coordinator(&chain_rules());
        let mut inputs = HashMap::new();
        inputs.insert("temp".to_string(), SensorValue::Number(70.0));

        let outcome = coordinator.evaluate_snapshot(&inputs, &HashMap::new(), 1_000);
        assert_eq!(outcome.outputs["overheat"], SensorValue::Bool(true));
        assert_eq!(outcome.outputs["fan_speed"], SensorValue::Number(100.0));
        assert_eq!(outcome.per_rule[0].layer, 0);
        assert_eq!(outcome.per_rule[1].layer, 1);
        assert_eq!(outcome.per_rule[1].condition, "overheat==true");
    }

    #[test]
    fn test_previous_outputs_fill_missing_only() {
        let rules = vec![RuleDefinition::new(
            "latch",
            Condition::compare("alarm", ComparisonOp::Eq, true),
        )
        .with_action(Action::set("latched", true))];
        let (coordinator, _) = coordinator(&rules);

        let mut previous = HashMap::new();
        previous.insert("alarm".to_string(), SensorValue::Bool(true));
        let outcome = coordinator.evaluate_snapshot(&HashMap::new(), &previous, 0);
        assert_eq!(outcome.outputs["latched"], SensorValue::Bool(true));

        // the live snapshot wins over a stale output
        let mut inputs = HashMap::new();
        inputs.insert("alarm".to_string(), SensorValue::Bool(false));
        let outcome = coordinator.evaluate_snapshot(&inputs, &previous, 0);
        assert!(outcome.outputs.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_rule_error_isolated_and_logged() {
        let rules = vec![
            RuleDefinition::new("broken", Condition::expression("mode * 2 > 1"))
                .with_action(Action::set("x", 1.0)),
            RuleDefinition::new("sibling", Condition::compare("temp", ComparisonOp::Gt, 0.0))
                .with_action(Action::set("y", 1.0)),
        ];
        let (coordinator, _) = coordinator(&rules);
        let mut inputs = HashMap::new();
        inputs.insert("mode".to_string(), SensorValue::from("auto"));
        inputs.insert("temp".to_string(), SensorValue::Number(5.0));

        let outcome = coordinator.evaluate_snapshot(&inputs, &HashMap::new(), 0);
        assert_eq!(outcome.errors, 1);
        assert!(!outcome.outputs.contains_key("x"));
        assert_eq!(outcome.outputs["y"], SensorValue::Number(1.0));
        assert_eq!(coordinator.rule_stats()["broken"].errors, 1);
        let broken = outcome.per_rule.iter().find(|r| r.rule == "broken").unwrap();
        assert!(broken
            .error
            .as_deref()
            .unwrap()
            .starts_with("Rule 'broken' evaluation error"));
        assert!(logs_contain("Rule broken eval err"));
    }

    #[test]
    fn test_only_numeric_inputs_buffered() {
        let (coordinator, _) = coordinator(&chain_rules());
        let mut inputs = HashMap::new();
        inputs.insert("temp".to_string(), SensorValue::from("42.5"));
        inputs.insert("door".to_string(), SensorValue::Bool(true));
        inputs.insert("mode".to_string(), SensorValue::from("auto"));

        coordinator.evaluate_snapshot(&inputs, &HashMap::new(), 500);
        assert_eq!(coordinator.buffers().sensor_count(), 1);
        let latest = coordinator.buffers().latest("temp").unwrap();
        assert_eq!(latest.value, 42.5);
        assert_eq!(latest.timestamp_ms, 500);

        coordinator.reset_temporal_state();
        assert_eq!(coordinator.buffers().sensor_count(), 0);
    }

    #[tokio::test]
    async fn test_run_cycle_publishes_outputs() {
        let (coordinator, rtdb) = coordinator(&chain_rules());
        rtdb.set_input("temp", SensorValue::Number(30.0)).await.unwrap();
        let mut rx = rtdb.subscribe("vigil:outputs");

        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.cycle_id, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.outputs["fan_speed"], SensorValue::Number(0.0));

        let stored = rtdb.get_all_outputs().await.unwrap();
        assert_eq!(stored["overheat"], SensorValue::Bool(false));

        let payload = rx.recv().await.unwrap();
        let published: HashMap<String, SensorValue> = serde_json::from_str(&payload).unwrap();
        assert_eq!(published, report.outputs);

        let stats = coordinator.rule_stats();
        assert_eq!(stats["hot"].executions, 1);
        assert_eq!(stats["hot"].else_count, 1);
    }

    #[tokio::test]
    async fn test_store_failure_abandons_cycle() {
        let (coordinator, rtdb) = coordinator(&chain_rules());
        let mut events = coordinator.subscribe();
        rtdb.set_offline(true);

        let err = coordinator.run_cycle().await.unwrap_err();
        assert!(matches!(err, RuleError::Store(_)));
        assert!(coordinator.rule_stats().is_empty());
        assert!(matches!(
            events.recv().await.unwrap(),
            CycleEvent::Failed { cycle_id: 1, .. }
        ));

        rtdb.set_offline(false);
        let report = coordinator.run_cycle().await.unwrap();
        assert_eq!(report.cycle_id, 2);
    }
}
