//! Error types for vigil-rtdb

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtdbError {
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Invalid data type: expected {expected}, got {got}")]
    InvalidDataType { expected: String, got: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RtdbError>;
