//! Rule compilation and per-layer execution
//!
//! `compile` turns enabled `RuleDefinition`s into a `CompiledRuleSet`: one
//! `RuleGroup` per dependency layer, rules inside a group ordered by
//! priority (highest first) then definition order. Groups are immutable
//! after compilation; only window trackers inside conditions mutate.

use crate::analyzer::DependencyAnalyzer;
use crate::condition::{CompiledCondition, EvalContext};
use crate::config::EngineConfig;
use crate::error::{Result, RuleError};
use crate::expression::CompiledExpression;
use crate::logger::format_condition;
use crate::logic::EvalResult;
use crate::types::{Action, ActionValue, RuleDefinition};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use vigil_rtdb::SensorValue;

/// Which action list a rule executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Primary,
    Else,
}

#[derive(Debug)]
enum CompiledValue {
    Literal(SensorValue),
    Sensor(String),
    Expression(CompiledExpression),
}

#[derive(Debug)]
enum CompiledAction {
    Set { key: String, value: CompiledValue },
    Publish { channel: String, message: String },
}

impl CompiledAction {
    fn compile(rule: &str, action: &Action) -> Result<Self> {
        match action {
            Action::Set { key, value } => {
                let value = match value {
                    ActionValue::Literal(v) => CompiledValue::Literal(v.clone()),
                    ActionValue::Sensor { sensor } => CompiledValue::Sensor(sensor.clone()),
                    ActionValue::Expression { expression } => CompiledValue::Expression(
                        CompiledExpression::parse(expression)
                            .map_err(|e| RuleError::malformed(rule, e))?,
                    ),
                };
                Ok(CompiledAction::Set {
                    key: key.clone(),
                    value,
                })
            },
            Action::Publish { channel, message } => Ok(CompiledAction::Publish {
                channel: channel.clone(),
                message: message.clone(),
            }),
        }
    }
}

/// Result of one rule execution within a cycle
#[derive(Debug)]
pub struct RuleOutcome {
    pub rule: String,
    /// `None` when evaluation failed
    pub verdict: Option<EvalResult>,
    pub branch: Option<Branch>,
    /// Written keys in action order
    pub outputs: Vec<(String, SensorValue)>,
    /// (channel, message) notifications
    pub publishes: Vec<(String, String)>,
    pub duration_us: u64,
    /// Always `RuleError::EvaluationError` when set
    pub error: Option<RuleError>,
}

impl RuleOutcome {
    fn failed(rule: &str, reason: String, duration_us: u64, verdict: Option<EvalResult>) -> Self {
        Self {
            rule: rule.to_string(),
            verdict,
            branch: None,
            outputs: Vec::new(),
            publishes: Vec::new(),
            duration_us,
            error: Some(RuleError::evaluation(rule, reason)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Rule ready for execution
#[derive(Debug)]
pub struct CompiledRule {
    name: String,
    priority: u32,
    condition_text: String,
    condition: CompiledCondition,
    actions: Vec<CompiledAction>,
    else_actions: Vec<CompiledAction>,
}

impl CompiledRule {
    pub fn compile(def: &RuleDefinition) -> Result<Self> {
        let condition = CompiledCondition::compile(&def.name, &def.condition)?;
        let actions = def
            .actions
            .iter()
            .map(|a| CompiledAction::compile(&def.name, a))
            .collect::<Result<Vec<_>>>()?;
        let else_actions = def
            .else_actions
            .iter()
            .map(|a| CompiledAction::compile(&def.name, a))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: def.name.clone(),
            priority: def.priority,
            condition_text: format_condition(&def.condition),
            condition,
            actions,
            else_actions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Compact rendering of the condition tree
    pub fn condition_text(&self) -> &str {
        &self.condition_text
    }

    pub fn tracker_count(&self) -> usize {
        self.condition.tracker_count()
    }

    pub fn reset(&self) {
        self.condition.reset();
    }

    /// Evaluate the condition and run the selected branch
    ///
    /// Never fails: evaluation errors are folded into the outcome and the
    /// rule contributes no outputs.
    pub fn execute(&self, ctx: &EvalContext<'_>) -> RuleOutcome {
        let start = Instant::now();

        let verdict = match self.condition.evaluate(ctx) {
            Ok(v) => v,
            Err(reason) => {
                return RuleOutcome::failed(&self.name, reason, elapsed_us(start), None);
            },
        };

        let branch = if verdict.is_true() {
            Branch::Primary
        } else {
            Branch::Else
        };
        let actions = match branch {
            Branch::Primary => &self.actions,
            Branch::Else => &self.else_actions,
        };

        let mut outputs = Vec::new();
        let mut publishes = Vec::new();
        for action in actions {
            match action {
                CompiledAction::Set { key, value } => match self.resolve(value, ctx) {
                    Ok(Some(v)) => outputs.push((key.clone(), v)),
                    Ok(None) => {},
                    Err(reason) => {
                        return RuleOutcome::failed(
                            &self.name,
                            reason,
                            elapsed_us(start),
                            Some(verdict),
                        );
                    },
                },
                CompiledAction::Publish { channel, message } => {
                    publishes.push((channel.clone(), message.clone()));
                },
            }
        }

        RuleOutcome {
            rule: self.name.clone(),
            verdict: Some(verdict),
            branch: Some(branch),
            outputs,
            publishes,
            duration_us: elapsed_us(start),
            error: None,
        }
    }

    /// Value for a `Set` action; `Ok(None)` skips the write
    fn resolve(
        &self,
        value: &CompiledValue,
        ctx: &EvalContext<'_>,
    ) -> std::result::Result<Option<SensorValue>, String> {
        match value {
            CompiledValue::Literal(v) => Ok(Some(v.clone())),
            CompiledValue::Sensor(sensor) => match ctx.inputs.get(sensor) {
                Some(v) => Ok(Some(v.clone())),
                None => {
                    warn!("Rule {} skip: {} missing", self.name, sensor);
                    Ok(None)
                },
            },
            CompiledValue::Expression(expr) => match expr.eval_number(ctx.inputs)? {
                Some(n) if n.is_finite() => Ok(Some(SensorValue::Number(n))),
                Some(n) => Err(format!(
                    "Formula '{}' produced non-finite {}",
                    expr.source(),
                    n
                )),
                None => {
                    warn!("Rule {} skip: '{}' has missing inputs", self.name, expr.source());
                    Ok(None)
                },
            },
        }
    }
}

fn elapsed_us(start: Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

/// Run one rule, turning a panic into a failed outcome
fn run_isolated(rule: &str, run: impl FnOnce() -> RuleOutcome) -> RuleOutcome {
    let start = Instant::now();
    catch_unwind(AssertUnwindSafe(run)).unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Rule {} panicked: {}", rule, reason);
        RuleOutcome::failed(rule, format!("panicked: {}", reason), elapsed_us(start), None)
    })
}

/// Rules of one dependency layer
#[derive(Debug)]
pub struct RuleGroup {
    layer: usize,
    rules: Vec<CompiledRule>,
}

impl RuleGroup {
    pub fn new(layer: usize, rules: Vec<CompiledRule>) -> Self {
        Self { layer, rules }
    }

    pub fn layer(&self) -> usize {
        self.layer
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(CompiledRule::name).collect()
    }

    /// Execute every rule against the same visible inputs
    ///
    /// Outcomes are returned in rule order whether or not the layer ran
    /// on worker threads. A panicking rule fails alone on either path.
    pub fn execute(&self, ctx: &EvalContext<'_>, parallel: bool) -> Vec<RuleOutcome> {
        let workers = if parallel {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(self.rules.len())
        } else {
            1
        };
        if workers < 2 {
            return run_chunk(&self.rules, ctx);
        }
        let chunk_size = self.rules.len().div_ceil(workers);

        // Workers borrow the layer's inputs, so they are scoped to this call
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .rules
                .chunks(chunk_size)
                .map(|chunk| (chunk, scope.spawn(move || run_chunk(chunk, ctx))))
                .collect();

            let mut outcomes = Vec::with_capacity(self.rules.len());
            for (chunk, handle) in handles {
                match handle.join() {
                    Ok(results) => outcomes.extend(results),
                    Err(_) => {
                        error!("Layer {} worker died", self.layer);
                        outcomes.extend(chunk.iter().map(|r| {
                            RuleOutcome::failed(&r.name, "worker died".to_string(), 0, None)
                        }));
                    },
                }
            }
            outcomes
        })
    }

    pub fn reset(&self) {
        self.rules.iter().for_each(CompiledRule::reset);
    }
}

fn run_chunk(rules: &[CompiledRule], ctx: &EvalContext<'_>) -> Vec<RuleOutcome> {
    rules
        .iter()
        .map(|r| run_isolated(&r.name, || r.execute(ctx)))
        .collect()
}

/// Layered, ready-to-run rule set
#[derive(Debug, Default)]
pub struct CompiledRuleSet {
    groups: Vec<RuleGroup>,
    dependencies: HashMap<String, BTreeSet<String>>,
    long_chains: Vec<String>,
}

impl CompiledRuleSet {
    pub fn groups(&self) -> &[RuleGroup] {
        &self.groups
    }

    pub fn layer_count(&self) -> usize {
        self.groups.len()
    }

    pub fn rule_count(&self) -> usize {
        self.groups.iter().map(RuleGroup::len).sum()
    }

    /// Producers of a rule's inputs, by name
    pub fn dependencies_of(&self, rule: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(rule)
    }

    /// Rules flagged for deep dependency chains
    pub fn long_chains(&self) -> &[String] {
        &self.long_chains
    }

    /// Rule names per layer, in execution order
    pub fn layer_names(&self) -> Vec<Vec<String>> {
        self.groups
            .iter()
            .map(|g| g.rule_names().into_iter().map(String::from).collect())
            .collect()
    }

    pub fn tracker_count(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.rules())
            .map(CompiledRule::tracker_count)
            .sum()
    }

    /// Return every window tracker to idle
    pub fn reset(&self) {
        self.groups.iter().for_each(RuleGroup::reset);
    }
}

/// Validate, analyze and layer the enabled rules
pub fn compile(rules: &[RuleDefinition], config: &EngineConfig) -> Result<CompiledRuleSet> {
    let enabled: Vec<RuleDefinition> = rules.iter().filter(|r| r.enabled).cloned().collect();
    let skipped = rules.len() - enabled.len();
    if skipped > 0 {
        debug!("Skipped {} disabled rules", skipped);
    }

    let mut compiled: Vec<Option<CompiledRule>> = enabled
        .iter()
        .map(|def| CompiledRule::compile(def).map(Some))
        .collect::<Result<Vec<_>>>()?;

    let analyzer = DependencyAnalyzer::new(config.chain_warning_threshold);
    let analysis = analyzer.analyze(&enabled)?;
    analyzer.check_conflicts(&enabled, &analysis)?;

    let mut groups = Vec::with_capacity(analysis.layers.len());
    for (layer, members) in analysis.layers.iter().enumerate() {
        let mut order = members.clone();
        order.sort_by_key(|&idx| (Reverse(enabled[idx].priority), idx));
        let rules: Vec<CompiledRule> = order
            .into_iter()
            .filter_map(|idx| compiled[idx].take())
            .collect();
        debug!("Layer {}: {} rules", layer, rules.len());
        groups.push(RuleGroup::new(layer, rules));
    }

    let set = CompiledRuleSet {
        groups,
        dependencies: analysis.dependencies,
        long_chains: analysis.long_chains,
    };
    info!(
        "Compiled {} rules into {} layers",
        set.rule_count(),
        set.layer_count()
    );
    Ok(set)
}
