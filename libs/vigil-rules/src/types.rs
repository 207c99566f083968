//! Compiled rule descriptor types
//!
//! The shape handed over by the rule-language front end:
//! - RuleDefinition: name, condition tree, primary and else actions
//! - Condition: closed enum over comparison, temporal, expression and group kinds
//! - Action: output writes and pub/sub notifications
//! - ComparisonOp: operator set shared by leaves and temporal conditions

use crate::error::Result;
use crate::expression::CompiledExpression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use vigil_rtdb::SensorValue;

// ============================================================================
// Comparison operators
// ============================================================================

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = ">=", alias = "ge", alias = "gte")]
    Ge,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = "<=", alias = "le", alias = "lte")]
    Le,
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
        }
    }

    /// Ordering operators are the only ones allowed on temporal conditions
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            ComparisonOp::Gt | ComparisonOp::Ge | ComparisonOp::Lt | ComparisonOp::Le
        )
    }

    /// Numeric comparison; equality uses `f64::EPSILON`
    pub fn compare(self, left: f64, right: f64) -> bool {
        match self {
            ComparisonOp::Eq => (left - right).abs() < f64::EPSILON,
            ComparisonOp::Ne => (left - right).abs() >= f64::EPSILON,
            ComparisonOp::Gt => left > right,
            ComparisonOp::Lt => left < right,
            ComparisonOp::Ge => left >= right,
            ComparisonOp::Le => left <= right,
        }
    }

    /// Compare two scalars
    ///
    /// Numeric when both sides coerce to a number. Otherwise only `==` and
    /// `!=` are defined, over booleans first and then raw text. Returns
    /// `None` when the comparison has no meaning for the given values.
    pub fn compare_values(self, left: &SensorValue, right: &SensorValue) -> Option<bool> {
        if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
            return Some(self.compare(l, r));
        }

        let equal = match (left.as_bool(), right.as_bool()) {
            (Some(l), Some(r)) => l == r,
            _ => match (left, right) {
                (SensorValue::Text(l), SensorValue::Text(r)) => l == r,
                _ => false,
            },
        };

        match self {
            ComparisonOp::Eq => Some(equal),
            ComparisonOp::Ne => Some(!equal),
            _ => None,
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" => Ok(ComparisonOp::Gt),
            ">=" | "ge" | "gte" => Ok(ComparisonOp::Ge),
            "<" | "lt" => Ok(ComparisonOp::Lt),
            "<=" | "le" | "lte" => Ok(ComparisonOp::Le),
            "==" | "eq" => Ok(ComparisonOp::Eq),
            "!=" | "ne" => Ok(ComparisonOp::Ne),
            other => Err(format!("unsupported comparison operator '{}'", other)),
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ============================================================================
// Conditions
// ============================================================================

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// Another sensor's current value
    Sensor { sensor: String },
    Literal(SensorValue),
}

/// How a threshold-over-time condition establishes its duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalMode {
    /// Per-condition window tracker fed once per cycle
    #[default]
    Window,
    /// Buffer history anchored at the last reading, guard included
    Strict,
    /// Buffer history assuming the last value persists until now
    Extended,
}

/// Group combinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupLogic {
    #[serde(alias = "and")]
    All,
    #[serde(alias = "or")]
    Any,
    Not,
}

/// Condition tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Instantaneous comparison of one sensor
    Comparison {
        sensor: String,
        operator: ComparisonOp,
        value: Operand,
    },

    /// Threshold held continuously for a duration
    ThresholdOverTime {
        sensor: String,
        operator: ComparisonOp,
        threshold: f64,
        duration_ms: u64,
        #[serde(default)]
        mode: TemporalMode,
    },

    /// evalexpr boolean expression over sensor names
    Expression { expression: String },

    /// Nested conditions combined with three-valued logic
    Group {
        logic: GroupLogic,
        conditions: Vec<Condition>,
    },
}

impl Condition {
    pub fn compare(
        sensor: impl Into<String>,
        operator: ComparisonOp,
        value: impl Into<SensorValue>,
    ) -> Self {
        Condition::Comparison {
            sensor: sensor.into(),
            operator,
            value: Operand::Literal(value.into()),
        }
    }

    pub fn compare_sensor(
        sensor: impl Into<String>,
        operator: ComparisonOp,
        other: impl Into<String>,
    ) -> Self {
        Condition::Comparison {
            sensor: sensor.into(),
            operator,
            value: Operand::Sensor {
                sensor: other.into(),
            },
        }
    }

    pub fn held_for(
        sensor: impl Into<String>,
        operator: ComparisonOp,
        threshold: f64,
        duration_ms: u64,
        mode: TemporalMode,
    ) -> Self {
        Condition::ThresholdOverTime {
            sensor: sensor.into(),
            operator,
            threshold,
            duration_ms,
            mode,
        }
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        Condition::Expression {
            expression: expression.into(),
        }
    }

    pub fn all(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            logic: GroupLogic::All,
            conditions,
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Condition::Group {
            logic: GroupLogic::Any,
            conditions,
        }
    }

    pub fn negate(condition: Condition) -> Self {
        Condition::Group {
            logic: GroupLogic::Not,
            conditions: vec![condition],
        }
    }

    /// Add every sensor key this condition reads to `out`
    ///
    /// Unparsable expressions contribute nothing here; compilation reports them.
    pub fn collect_reads(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::Comparison { sensor, value, .. } => {
                out.insert(sensor.clone());
                if let Operand::Sensor { sensor } = value {
                    out.insert(sensor.clone());
                }
            },
            Condition::ThresholdOverTime { sensor, .. } => {
                out.insert(sensor.clone());
            },
            Condition::Expression { expression } => {
                if let Ok(idents) = expression_identifiers(expression) {
                    out.extend(idents);
                }
            },
            Condition::Group { conditions, .. } => {
                for c in conditions {
                    c.collect_reads(out);
                }
            },
        }
    }
}

/// Variable identifiers referenced by an evalexpr expression
pub fn expression_identifiers(expression: &str) -> std::result::Result<Vec<String>, String> {
    CompiledExpression::parse(expression).map(|e| e.identifiers().to_vec())
}

// ============================================================================
// Actions
// ============================================================================

/// Value written by a `Set` action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    /// Copy another sensor's current value
    Sensor { sensor: String },
    /// Numeric evalexpr formula over sensor names
    Expression { expression: String },
    Literal(SensorValue),
}

/// Rule action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Write an output key
    Set { key: String, value: ActionValue },
    /// Notify a pub/sub channel
    Publish { channel: String, message: String },
}

impl Action {
    pub fn set(key: impl Into<String>, value: impl Into<SensorValue>) -> Self {
        Action::Set {
            key: key.into(),
            value: ActionValue::Literal(value.into()),
        }
    }

    pub fn set_from(key: impl Into<String>, sensor: impl Into<String>) -> Self {
        Action::Set {
            key: key.into(),
            value: ActionValue::Sensor {
                sensor: sensor.into(),
            },
        }
    }

    pub fn set_expr(key: impl Into<String>, expression: impl Into<String>) -> Self {
        Action::Set {
            key: key.into(),
            value: ActionValue::Expression {
                expression: expression.into(),
            },
        }
    }

    pub fn publish(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Action::Publish {
            channel: channel.into(),
            message: message.into(),
        }
    }

    fn collect_reads(&self, out: &mut BTreeSet<String>) {
        if let Action::Set { value, .. } = self {
            match value {
                ActionValue::Sensor { sensor } => {
                    out.insert(sensor.clone());
                },
                ActionValue::Expression { expression } => {
                    if let Ok(idents) = expression_identifiers(expression) {
                        out.extend(idents);
                    }
                },
                ActionValue::Literal(_) => {},
            }
        }
    }
}

// ============================================================================
// Rule definition
// ============================================================================

/// Rule descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Unique rule name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Ordering inside a layer (higher = earlier)
    #[serde(default)]
    pub priority: u32,

    pub condition: Condition,

    /// Executed when the condition is `True`
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Executed when the condition is `False` or `Indeterminate`
    #[serde(default)]
    pub else_actions: Vec<Action>,
}

fn default_enabled() -> bool {
    true
}

impl RuleDefinition {
    pub fn new(name: impl Into<String>, condition: Condition) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            priority: 0,
            condition,
            actions: Vec::new(),
            else_actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_else_action(mut self, action: Action) -> Self {
        self.else_actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Sensor keys read by the condition tree and action values
    pub fn reads(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.condition.collect_reads(&mut out);
        for action in self.actions.iter().chain(self.else_actions.iter()) {
            action.collect_reads(&mut out);
        }
        out
    }

    /// Output keys written by either branch
    pub fn writes(&self) -> BTreeSet<String> {
        self.set_actions().map(|(key, _)| key.to_string()).collect()
    }

    /// Every `Set` action of both branches as (key, value)
    pub fn set_actions(&self) -> impl Iterator<Item = (&str, &ActionValue)> {
        self.actions
            .iter()
            .chain(self.else_actions.iter())
            .filter_map(|action| match action {
                Action::Set { key, value } => Some((key.as_str(), value)),
                Action::Publish { .. } => None,
            })
    }
}

/// Collection of rule descriptors as loaded from a JSON/YAML document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self { rules }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Rules that take part in analysis and execution
    pub fn enabled(&self) -> Vec<RuleDefinition> {
        self.rules.iter().filter(|r| r.enabled).cloned().collect()
    }
}
