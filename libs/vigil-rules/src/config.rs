//! Engine configuration

use crate::buffer::DEFAULT_BUFFER_CAPACITY;
use crate::error::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment prefix for overrides (`VIGIL_TICK_MS=250`)
pub const ENV_PREFIX: &str = "VIGIL_";

/// Default scheduler tick interval (1s)
pub const DEFAULT_TICK_MS: u64 = 1000;

/// Runtime settings for compilation and cycle execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Ring size of every per-sensor buffer
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Scheduler period in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Dependency chain depth above which a diagnostic is logged
    #[serde(default = "default_chain_warning_threshold")]
    pub chain_warning_threshold: usize,

    /// Evaluate large layers on scoped worker threads
    #[serde(default)]
    pub parallel_rules: bool,

    /// Smallest layer worth splitting across threads
    #[serde(default = "default_parallel_min_rules")]
    pub parallel_min_rules: usize,

    /// Channel receiving a JSON copy of each cycle's outputs
    #[serde(default = "default_output_channel")]
    pub output_channel: String,

    /// Expose last cycle's stored outputs as inputs
    #[serde(default = "default_true")]
    pub merge_previous_outputs: bool,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}

fn default_chain_warning_threshold() -> usize {
    10
}

fn default_parallel_min_rules() -> usize {
    8
}

fn default_output_channel() -> String {
    "vigil:outputs".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            tick_ms: default_tick_ms(),
            chain_warning_threshold: default_chain_warning_threshold(),
            parallel_rules: false,
            parallel_min_rules: default_parallel_min_rules(),
            output_channel: default_output_channel(),
            merge_previous_outputs: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(RuleError::ConfigError(
                "buffer_capacity must be > 0".to_string(),
            ));
        }
        if self.tick_ms == 0 {
            return Err(RuleError::ConfigError("tick_ms must be > 0".to_string()));
        }
        Ok(())
    }

    /// Defaults, then `path` if it exists, then `VIGIL_*` variables
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let config: EngineConfig = common::config::load_layered(path, ENV_PREFIX)?;
        config.validate()?;
        Ok(config)
    }
}
