//! Expression evaluation
//!
//! Expressions are parsed once at compile time into an evalexpr operator
//! tree and evaluated per cycle against the visible sensor values.
//!
//! ## Example
//!
//! ```ignore
//! let expr = CompiledExpression::parse("power_in - power_out > 5")?;
//! let verdict = expr.eval_bool(&inputs)?; // None while a sensor is missing
//! ```

use evalexpr::{ContextWithMutableVariables, HashMapContext, Node, Value};
use std::collections::HashMap;
use vigil_rtdb::SensorValue;

#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: String,
    node: Node,
    identifiers: Vec<String>,
}

impl CompiledExpression {
    /// Parse and collect the referenced sensor names
    pub fn parse(source: &str) -> Result<Self, String> {
        let node = evalexpr::build_operator_tree(source)
            .map_err(|e| format!("invalid expression '{}': {}", source, e))?;
        let mut identifiers: Vec<String> = node
            .iter_variable_identifiers()
            .map(|s| s.to_string())
            .collect();
        identifiers.sort();
        identifiers.dedup();

        Ok(Self {
            source: source.to_string(),
            node,
            identifiers,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Context holding every referenced sensor, or `None` if one is missing
    fn context(&self, inputs: &HashMap<String, SensorValue>) -> Result<Option<HashMapContext>, String> {
        let mut context = HashMapContext::new();
        for name in &self.identifiers {
            let Some(value) = inputs.get(name) else {
                return Ok(None);
            };
            context
                .set_value(name.clone(), to_value(value))
                .map_err(|e| format!("Failed to set variable '{}': {}", name, e))?;
        }
        Ok(Some(context))
    }

    /// Boolean verdict; numbers count as true when non-zero
    pub fn eval_bool(&self, inputs: &HashMap<String, SensorValue>) -> Result<Option<bool>, String> {
        let Some(context) = self.context(inputs)? else {
            return Ok(None);
        };
        let value = self
            .node
            .eval_with_context(&context)
            .map_err(|e| format!("Expression '{}' evaluation failed: {}", self.source, e))?;

        match value {
            Value::Boolean(b) => Ok(Some(b)),
            Value::Float(f) => Ok(Some(f != 0.0)),
            Value::Int(i) => Ok(Some(i != 0)),
            other => Err(format!(
                "Expression '{}' yielded non-boolean {:?}",
                self.source, other
            )),
        }
    }

    /// Numeric result for computed action values
    pub fn eval_number(&self, inputs: &HashMap<String, SensorValue>) -> Result<Option<f64>, String> {
        let Some(context) = self.context(inputs)? else {
            return Ok(None);
        };
        self.node
            .eval_number_with_context(&context)
            .map(Some)
            .map_err(|e| format!("Formula '{}' evaluation failed: {}", self.source, e))
    }
}

fn to_value(value: &SensorValue) -> Value {
    match value {
        SensorValue::Number(n) => Value::Float(*n),
        SensorValue::Bool(b) => Value::Boolean(*b),
        SensorValue::Text(s) => match value.as_number() {
            Some(n) => Value::Float(n),
            None => Value::String(s.clone()),
        },
    }
}
