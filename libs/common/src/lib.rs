//! Shared helpers for processes embedding the vigil rule core
//!
//! - logging: tracing subscriber setup with runtime level changes
//! - config: figment-based file and environment loading

pub mod config;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
