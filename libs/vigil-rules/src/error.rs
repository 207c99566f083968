//! Rule Engine Error Types

use thiserror::Error;

/// Result type for rule operations
pub type Result<T> = std::result::Result<T, RuleError>;

/// Rule engine errors
#[derive(Debug, Error)]
pub enum RuleError {
    /// Two rules share a name
    #[error("Duplicate rule name: {0}")]
    DuplicateRule(String),

    /// Rules feed each other's conditions in a loop
    #[error("Circular rule dependency: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Same-layer rules write one key with different literal values
    #[error("Conflicting writers for '{key}' in layer {layer}: {}", .rules.join(", "))]
    ConflictingWriters {
        layer: usize,
        key: String,
        rules: Vec<String>,
    },

    /// Condition cannot be compiled
    #[error("Malformed condition in rule '{rule}': {reason}")]
    MalformedCondition { rule: String, reason: String },

    /// Rule evaluation failed at runtime
    #[error("Rule '{rule}' evaluation error: {reason}")]
    EvaluationError { rule: String, reason: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backing store failure (fetch or publish)
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RuleError {
    pub fn malformed(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedCondition {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn evaluation(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EvaluationError {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    /// Errors reported before any cycle runs
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            RuleError::DuplicateRule(_)
                | RuleError::CircularDependency { .. }
                | RuleError::ConflictingWriters { .. }
                | RuleError::MalformedCondition { .. }
        )
    }
}

impl From<serde_json::Error> for RuleError {
    fn from(err: serde_json::Error) -> Self {
        RuleError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for RuleError {
    fn from(err: serde_yaml::Error) -> Self {
        RuleError::SerializationError(err.to_string())
    }
}

impl From<vigil_rtdb::RtdbError> for RuleError {
    fn from(err: vigil_rtdb::RtdbError) -> Self {
        RuleError::Store(err.to_string())
    }
}

impl From<anyhow::Error> for RuleError {
    fn from(err: anyhow::Error) -> Self {
        RuleError::Store(format!("{:#}", err))
    }
}

impl From<common::CommonError> for RuleError {
    fn from(err: common::CommonError) -> Self {
        RuleError::ConfigError(err.to_string())
    }
}
