//! Condition compilation and evaluation
//!
//! `Condition` descriptors are compiled once into `CompiledCondition`
//! trees: operators are validated, expressions pre-parsed and one
//! `WindowTracker` instantiated per windowed temporal leaf. Evaluation is
//! three-valued; a missing or unusable sensor yields `Indeterminate`.

use crate::buffer_store::BufferStore;
use crate::error::{Result, RuleError};
use crate::expression::CompiledExpression;
use crate::logic::EvalResult;
use crate::types::{ComparisonOp, Condition, GroupLogic, Operand, TemporalMode};
use crate::window::WindowTracker;
use parking_lot::Mutex;
use std::collections::HashMap;
use vigil_rtdb::SensorValue;

/// Everything a condition may look at during one evaluation
pub struct EvalContext<'a> {
    /// Visible inputs: snapshot, previous outputs, earlier layers' outputs
    pub inputs: &'a HashMap<String, SensorValue>,
    pub buffers: &'a BufferStore,
    pub now_ms: i64,
}

#[derive(Debug)]
pub enum CompiledCondition {
    Comparison {
        sensor: String,
        operator: ComparisonOp,
        value: Operand,
    },
    /// Buffer-backed threshold over time
    Held {
        sensor: String,
        operator: ComparisonOp,
        threshold: f64,
        duration_ms: u64,
        extend_last_known: bool,
    },
    /// Tracker-backed threshold over time
    Windowed {
        sensor: String,
        tracker: Mutex<WindowTracker>,
    },
    Expression(CompiledExpression),
    All(Vec<CompiledCondition>),
    Any(Vec<CompiledCondition>),
    Not(Box<CompiledCondition>),
}

impl CompiledCondition {
    /// Compile a descriptor; `rule` names the owner in error messages
    pub fn compile(rule: &str, condition: &Condition) -> Result<Self> {
        match condition {
            Condition::Comparison {
                sensor,
                operator,
                value,
            } => Ok(CompiledCondition::Comparison {
                sensor: sensor.clone(),
                operator: *operator,
                value: value.clone(),
            }),

            Condition::ThresholdOverTime {
                sensor,
                operator,
                threshold,
                duration_ms,
                mode,
            } => {
                if !operator.is_ordering() {
                    return Err(RuleError::malformed(
                        rule,
                        format!(
                            "unsupported comparison operator '{}' for threshold over time on '{}'",
                            operator, sensor
                        ),
                    ));
                }
                if !threshold.is_finite() {
                    return Err(RuleError::malformed(
                        rule,
                        format!("threshold for '{}' is not finite", sensor),
                    ));
                }
                Ok(match mode {
                    TemporalMode::Window => CompiledCondition::Windowed {
                        sensor: sensor.clone(),
                        tracker: Mutex::new(WindowTracker::new(*operator, *threshold, *duration_ms)),
                    },
                    TemporalMode::Strict | TemporalMode::Extended => CompiledCondition::Held {
                        sensor: sensor.clone(),
                        operator: *operator,
                        threshold: *threshold,
                        duration_ms: *duration_ms,
                        extend_last_known: *mode == TemporalMode::Extended,
                    },
                })
            },

            Condition::Expression { expression } => CompiledExpression::parse(expression)
                .map(CompiledCondition::Expression)
                .map_err(|reason| RuleError::malformed(rule, reason)),

            Condition::Group { logic, conditions } => {
                let children = conditions
                    .iter()
                    .map(|c| Self::compile(rule, c))
                    .collect::<Result<Vec<_>>>()?;
                match logic {
                    GroupLogic::All | GroupLogic::Any if children.is_empty() => {
                        Err(RuleError::malformed(rule, "empty condition group"))
                    },
                    GroupLogic::All => Ok(CompiledCondition::All(children)),
                    GroupLogic::Any => Ok(CompiledCondition::Any(children)),
                    GroupLogic::Not => {
                        let mut children = children;
                        match (children.pop(), children.is_empty()) {
                            (Some(child), true) => Ok(CompiledCondition::Not(Box::new(child))),
                            _ => Err(RuleError::malformed(
                                rule,
                                "'not' group needs exactly one condition",
                            )),
                        }
                    },
                }
            },
        }
    }

    /// Three-valued verdict; `Err` carries an evaluation failure message
    ///
    /// Groups evaluate every child so each window tracker sees every cycle.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> std::result::Result<EvalResult, String> {
        match self {
            CompiledCondition::Comparison {
                sensor,
                operator,
                value,
            } => {
                let Some(left) = ctx.inputs.get(sensor) else {
                    return Ok(EvalResult::Indeterminate);
                };
                let right = match value {
                    Operand::Literal(v) => v,
                    Operand::Sensor { sensor } => match ctx.inputs.get(sensor) {
                        Some(v) => v,
                        None => return Ok(EvalResult::Indeterminate),
                    },
                };
                Ok(operator
                    .compare_values(left, right)
                    .map_or(EvalResult::Indeterminate, EvalResult::from))
            },

            CompiledCondition::Held {
                sensor,
                operator,
                threshold,
                duration_ms,
                extend_last_known,
            } => {
                if ctx.buffers.latest(sensor).is_none() {
                    return Ok(EvalResult::Indeterminate);
                }
                Ok(EvalResult::from(ctx.buffers.holds_for_duration_at(
                    sensor,
                    *operator,
                    *threshold,
                    *duration_ms,
                    *extend_last_known,
                    ctx.now_ms,
                )))
            },

            CompiledCondition::Windowed { sensor, tracker } => {
                let value = ctx.inputs.get(sensor).and_then(SensorValue::as_f64);
                Ok(tracker.lock().evaluate(value, ctx.now_ms))
            },

            CompiledCondition::Expression(expr) => Ok(expr
                .eval_bool(ctx.inputs)?
                .map_or(EvalResult::Indeterminate, EvalResult::from)),

            CompiledCondition::All(children) => {
                let mut acc = EvalResult::True;
                for child in children {
                    acc = acc & child.evaluate(ctx)?;
                }
                Ok(acc)
            },

            CompiledCondition::Any(children) => {
                let mut acc = EvalResult::False;
                for child in children {
                    acc = acc | child.evaluate(ctx)?;
                }
                Ok(acc)
            },

            CompiledCondition::Not(child) => Ok(!child.evaluate(ctx)?),
        }
    }

    /// Return every window tracker in this tree to idle
    pub fn reset(&self) {
        match self {
            CompiledCondition::Windowed { tracker, .. } => tracker.lock().reset(),
            CompiledCondition::All(children) | CompiledCondition::Any(children) => {
                children.iter().for_each(CompiledCondition::reset)
            },
            CompiledCondition::Not(child) => child.reset(),
            _ => {},
        }
    }

    pub fn tracker_count(&self) -> usize {
        match self {
            CompiledCondition::Windowed { .. } => 1,
            CompiledCondition::All(children) | CompiledCondition::Any(children) => {
                children.iter().map(CompiledCondition::tracker_count).sum()
            },
            CompiledCondition::Not(child) => child.tracker_count(),
            _ => 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::Arc;
    use vigil_rtdb::ManualTimeProvider;

    fn inputs(pairs: &[(&str, SensorValue)]) -> HashMap<String, SensorValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn buffers() -> BufferStore {
        BufferStore::new(16, Arc::new(ManualTimeProvider::new(0)))
    }

    fn eval(cond: &CompiledCondition, vals: &HashMap<String, SensorValue>, now_ms: i64) -> EvalResult {
        let store = buffers();
        let ctx = EvalContext {
            inputs: vals,
            buffers: &store,
            now_ms,
        };
        cond.evaluate(&ctx).unwrap()
    }

    #[test]
    fn test_rejects_equality_over_time() {
        let cond = Condition::held_for("t", ComparisonOp::Eq, 1.0, 10, TemporalMode::Strict);
        let err = CompiledCondition::compile("r1", &cond).unwrap_err();
        assert!(matches!(err, RuleError::MalformedCondition { ref rule, .. } if rule == "r1"));
        assert!(err.to_string().contains("unsupported comparison operator"));
    }

    #[test]
    fn test_rejects_bad_groups() {
        assert!(CompiledCondition::compile("r", &Condition::all(vec![])).is_err());
        let not_two = Condition::Group {
            logic: GroupLogic::Not,
            conditions: vec![
                Condition::compare("a", ComparisonOp::Gt, 1.0),
                Condition::compare("b", ComparisonOp::Gt, 1.0),
            ],
        };
        assert!(CompiledCondition::compile("r", &not_two).is_err());
        assert!(CompiledCondition::compile("r", &Condition::expression("a >")).is_err());
    }

    #[test]
    fn test_missing_sensor_is_indeterminate() {
        let cond =
            CompiledCondition::compile("r", &Condition::compare("temp", ComparisonOp::Gt, 50.0))
                .unwrap();
        assert_eq!(eval(&cond, &HashMap::new(), 0), EvalResult::Indeterminate);
        assert_eq!(
            eval(&cond, &inputs(&[("temp", 51.0.into())]), 0),
            EvalResult::True
        );
    }

    #[test]
    fn test_sensor_operand() {
        let cond = CompiledCondition::compile(
            "r",
            &Condition::compare_sensor("load", ComparisonOp::Lt, "max_load"),
        )
        .unwrap();
        let vals = inputs(&[("load", 5.0.into()), ("max_load", 8.0.into())]);
        assert_eq!(eval(&cond, &vals, 0), EvalResult::True);
        let vals = inputs(&[("load", 5.0.into())]);
        assert_eq!(eval(&cond, &vals, 0), EvalResult::Indeterminate);
    }

    #[test]
    fn test_group_kleene_semantics() {
        let cond = CompiledCondition::compile(
            "r",
            &Condition::all(vec![
                Condition::compare("a", ComparisonOp::Gt, 1.0),
                Condition::compare("missing", ComparisonOp::Gt, 1.0),
            ]),
        )
        .unwrap();
        assert_eq!(eval(&cond, &inputs(&[("a", 0.0.into())]), 0), EvalResult::False);
        assert_eq!(
            eval(&cond, &inputs(&[("a", 5.0.into())]), 0),
            EvalResult::Indeterminate
        );

        let cond = CompiledCondition::compile(
            "r",
            &Condition::any(vec![
                Condition::compare("a", ComparisonOp::Gt, 1.0),
                Condition::compare("missing", ComparisonOp::Gt, 1.0),
            ]),
        )
        .unwrap();
        assert_eq!(eval(&cond, &inputs(&[("a", 5.0.into())]), 0), EvalResult::True);

        let cond = CompiledCondition::compile(
            "r",
            &Condition::negate(Condition::compare("missing", ComparisonOp::Gt, 1.0)),
        )
        .unwrap();
        assert_eq!(eval(&cond, &HashMap::new(), 0), EvalResult::Indeterminate);
    }

    #[test]
    fn test_windowed_condition_uses_tracker() {
        let cond = CompiledCondition::compile(
            "r",
            &Condition::held_for("temp", ComparisonOp::Gt, 50.0, 2_000, TemporalMode::Window),
        )
        .unwrap();
        assert_eq!(cond.tracker_count(), 1);

        let hot = inputs(&[("temp", 60.0.into())]);
        assert_eq!(eval(&cond, &hot, 0), EvalResult::False);
        assert_eq!(eval(&cond, &hot, 2_000), EvalResult::True);
        assert_eq!(eval(&cond, &HashMap::new(), 3_000), EvalResult::Indeterminate);

        assert_eq!(eval(&cond, &hot, 4_000), EvalResult::False);
        cond.reset();
        assert_eq!(eval(&cond, &hot, 10_000), EvalResult::False);
    }

    #[test]
    fn test_held_condition_reads_buffers() {
        let cond = CompiledCondition::compile(
            "r",
            &Condition::held_for("temp", ComparisonOp::Gt, 50.0, 10_000, TemporalMode::Extended),
        )
        .unwrap();
        let store = buffers();
        let empty = HashMap::new();
        let ctx = EvalContext {
            inputs: &empty,
            buffers: &store,
            now_ms: 20_000,
        };
        assert_eq!(cond.evaluate(&ctx).unwrap(), EvalResult::Indeterminate);

        store.update("temp", 60.0, 8_000);
        assert_eq!(cond.evaluate(&ctx).unwrap(), EvalResult::True);
    }

    #[test]
    fn test_expression_condition() {
        let cond = CompiledCondition::compile("r", &Condition::expression("a + b > 10")).unwrap();
        let vals = inputs(&[("a", 4.0.into()), ("b", 7.0.into())]);
        assert_eq!(eval(&cond, &vals, 0), EvalResult::True);
        assert_eq!(
            eval(&cond, &inputs(&[("a", 4.0.into())]), 0),
            EvalResult::Indeterminate
        );
    }
}
