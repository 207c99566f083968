//! Vigil Rules - Rule Evaluation Core
//!
//! Evaluates compiled rule descriptors against periodic sensor snapshots:
//! - Three-valued condition logic with temporal (held-for-duration) leaves
//! - Per-sensor ring buffers and per-condition window trackers
//! - Dependency layering so one cycle resolves chained rules
//! - Fixed-interval scheduling and a cycle metrics side-channel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Scheduler  │────▶│ Coordinator  │────▶│ SensorStore  │
//! │  (tick_ms)  │     │ (run_cycle)  │     │ (in / out)   │
//! └─────────────┘     └──────────────┘     └──────────────┘
//!                        │        │
//!                        ▼        ▼
//!               ┌────────────┐ ┌─────────────┐
//!               │ RuleGroups │ │ BufferStore │
//!               │ (layers)   │ │ (history)   │
//!               └────────────┘ └─────────────┘
//! ```

pub mod analyzer;
pub mod buffer;
pub mod buffer_store;
pub mod condition;
pub mod config;
pub mod coordinator;
mod error;
pub mod expression;
pub mod group;
pub mod logger;
pub mod logic;
pub mod observer;
mod scheduler;
pub mod types;
pub mod window;

// Re-export public API
pub use analyzer::{DependencyAnalysis, DependencyAnalyzer};
pub use buffer::{TimeSeriesBuffer, TimestampedValue, DEFAULT_BUFFER_CAPACITY};
pub use buffer_store::BufferStore;
pub use condition::{CompiledCondition, EvalContext};
pub use config::{EngineConfig, DEFAULT_TICK_MS, ENV_PREFIX};
pub use coordinator::{Coordinator, CycleOutcome, CycleReport, RuleRunStat, RuleStats};
pub use error::{Result, RuleError};
pub use expression::CompiledExpression;
pub use group::{compile, Branch, CompiledRule, CompiledRuleSet, RuleGroup, RuleOutcome};
pub use logger::format_condition;
pub use logic::EvalResult;
pub use observer::{CycleEvent, EngineMetrics, MetricsObserver};
pub use scheduler::{RuleScheduler, SchedulerStatus};
pub use window::{WindowState, WindowTracker};

// Re-export rule types for convenience
pub use types::{
    Action, ActionValue, ComparisonOp, Condition, GroupLogic, Operand, RuleDefinition, RuleSet,
    TemporalMode,
};
