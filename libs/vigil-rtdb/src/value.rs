//! Sensor value variant and coercion rules
//!
//! Values arriving from the store are numbers, booleans or text. The
//! buffer path only accepts numbers (and numeric text); comparisons may
//! coerce booleans to 1.0/0.0; boolean checks accept the tolerant
//! spellings used by device configs ("yes", "on", "1", ...).

use crate::error::{Result, RtdbError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single scalar read from or written to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Value plus the time it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: SensorValue,
    pub timestamp_ms: i64,
}

impl SensorValue {
    /// Numeric view for the time-series buffer
    ///
    /// Booleans bypass the buffer and yield `None`. Non-finite numbers
    /// are rejected.
    pub fn as_number(&self) -> Option<f64> {
        let n = match self {
            SensorValue::Number(n) => *n,
            SensorValue::Text(s) => s.trim().parse::<f64>().ok()?,
            SensorValue::Bool(_) => return None,
        };
        n.is_finite().then_some(n)
    }

    /// Numeric view for comparisons (booleans become 1.0 / 0.0)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            other => other.as_number(),
        }
    }

    /// Tolerant boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SensorValue::Bool(b) => Some(*b),
            SensorValue::Number(n) => Some(*n != 0.0),
            SensorValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SensorValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view or a typed error
    pub fn try_number(&self) -> Result<f64> {
        self.as_f64().ok_or_else(|| RtdbError::InvalidDataType {
            expected: "number".to_string(),
            got: self.type_name().to_string(),
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SensorValue::Bool(_) => "bool",
            SensorValue::Number(_) => "number",
            SensorValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Bool(b) => write!(f, "{}", b),
            SensorValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            },
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for SensorValue {
    fn from(v: f64) -> Self {
        SensorValue::Number(v)
    }
}

impl From<i64> for SensorValue {
    fn from(v: i64) -> Self {
        SensorValue::Number(v as f64)
    }
}

impl From<bool> for SensorValue {
    fn from(v: bool) -> Self {
        SensorValue::Bool(v)
    }
}

impl From<&str> for SensorValue {
    fn from(v: &str) -> Self {
        SensorValue::Text(v.to_string())
    }
}

impl From<String> for SensorValue {
    fn from(v: String) -> Self {
        SensorValue::Text(v)
    }
}
