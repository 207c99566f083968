//! Logging initialisation
//!
//! Console output uses a bracketed level format, an optional daily-rolling
//! file sink is added through `tracing-appender`, and the filter can be
//! swapped at runtime through a reload handle.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::{CommonError, Result};

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809000Z [INFO] Engine started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// File writer guards must outlive the subscriber
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name used for the log file and the default per-crate filter
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Daily-rolling log file directory; console only when `None`
    pub log_dir: Option<PathBuf>,
    /// JSON lines in the file sink
    pub enable_json: bool,
    /// ANSI colours on the console
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "vigil".to_string(),
            level: "info".to_string(),
            log_dir: None,
            enable_json: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Filter directive honouring `RUST_LOG` first
    fn filter_directive(&self) -> String {
        match std::env::var("RUST_LOG") {
            Ok(env_str) if !env_str.trim().is_empty() => env_str,
            _ => self.level.clone(),
        }
    }
}

/// Initialize the global subscriber
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_with_config(config: LogConfig) -> Result<()> {
    let directive = config.filter_directive();
    let env_filter = EnvFilter::try_new(&directive)
        .map_err(|e| CommonError::Logging(format!("Invalid log level '{}': {}", directive, e)))?;

    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);
    let registry = tracing_subscriber::registry().with(reload_filter);

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let mut file_guard = None;
    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.service_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    registry
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CommonError::Logging(format!("Failed to initialize logging: {}", e)))?;

    if let Some(guard) = file_guard {
        let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
        match guards.lock() {
            Ok(mut guards) => guards.push(guard),
            Err(poisoned) => poisoned.into_inner().push(guard),
        }
    }

    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let current = CURRENT_LOG_LEVEL.get_or_init(|| Mutex::new(String::new()));
    if let Ok(mut slot) = current.lock() {
        *slot = directive;
    }

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    Ok(())
}

/// Console-only shorthand
pub fn init(level: &str) -> Result<()> {
    init_with_config(LogConfig {
        level: level.to_string(),
        ..Default::default()
    })
}

/// Swap the active filter at runtime
///
/// Accepts a bare level (`"debug"`) or a full directive (`"info,vigil_rules=debug"`).
pub fn set_log_level(level: &str) -> std::result::Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Current filter directive, `"unknown"` before initialisation
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}
