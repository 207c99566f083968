//! Compact text renderings for rule execution logs
//!
//! Line format: `condition | verdict -> branch | key=value ... OK`

use crate::types::{Condition, GroupLogic, Operand, TemporalMode};
use std::collections::HashMap;
use vigil_rtdb::SensorValue;

/// Render a condition tree, e.g. `(temp>50 && !(door==1))`
pub fn format_condition(condition: &Condition) -> String {
    match condition {
        Condition::Comparison {
            sensor,
            operator,
            value,
        } => {
            let rhs = match value {
                Operand::Literal(v) => v.to_string(),
                Operand::Sensor { sensor } => sensor.clone(),
            };
            format!("{}{}{}", sensor, operator, rhs)
        },
        Condition::ThresholdOverTime {
            sensor,
            operator,
            threshold,
            duration_ms,
            mode,
        } => {
            let base = format!(
                "{}{}{} for {}ms",
                sensor,
                operator,
                SensorValue::Number(*threshold),
                duration_ms
            );
            match mode {
                TemporalMode::Window => base,
                TemporalMode::Strict => format!("{} (strict)", base),
                TemporalMode::Extended => format!("{} (extended)", base),
            }
        },
        Condition::Expression { expression } => expression.clone(),
        Condition::Group { logic, conditions } => match logic {
            GroupLogic::All => join_group(conditions, " && "),
            GroupLogic::Any => join_group(conditions, " || "),
            GroupLogic::Not => {
                let inner = join_group(conditions, ", ");
                if inner.starts_with('(') {
                    format!("!{}", inner)
                } else {
                    format!("!({})", inner)
                }
            },
        },
    }
}

fn join_group(conditions: &[Condition], sep: &str) -> String {
    match conditions {
        [single] => match single {
            Condition::Group { .. } => format_condition(single),
            _ if sep == ", " => format_condition(single),
            _ => format!("({})", format_condition(single)),
        },
        _ => format!(
            "({})",
            conditions
                .iter()
                .map(format_condition)
                .collect::<Vec<_>>()
                .join(sep)
        ),
    }
}

/// Render values sorted by key: `fan=true speed=80`, `-` when empty
pub fn format_values(values: &HashMap<String, SensorValue>) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    let mut pairs: Vec<_> = values.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render written outputs or the failure reason
pub fn format_actions(outputs: &[(String, SensorValue)], error: Option<&str>) -> String {
    if let Some(err) = error {
        return format!("ERR {}", err);
    }
    if outputs.is_empty() {
        return "-".to_string();
    }
    let parts: Vec<String> = outputs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{} OK", parts.join(" "))
}
