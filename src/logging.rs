//! Tracing setup for applications embedding the store.
//!
//! The store itself only emits `tracing` events: `info` when a file is
//! created, opened or closed, `debug` on capacity growth and experiment
//! creation, `warn` when a store is dropped with unflushed changes. Nothing is
//! printed until a subscriber is installed, which is what [`init`] does.
//!
//! # Example
//! ```no_run
//! use crossbar_store::{config::StoreConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored, for development
    Pretty,
    /// Single-line, no colors
    Compact,
    /// JSON objects, for log aggregation
    Json,
}

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    /// ANSI colors, Pretty format only
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            with_span_events: false,
            with_file_and_line: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Settings from the `[logging]` section of a store configuration.
    pub fn from_store_config(config: &StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            level: parse_log_level(&config.logging.level)?,
            format: parse_format(&config.logging.format)?,
            ..Default::default()
        })
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install a subscriber configured from a store configuration.
pub fn init_from_config(config: &StoreConfig) -> StoreResult<()> {
    init(LoggingConfig::from_store_config(config)?)
}

/// Install a global subscriber.
///
/// Idempotent: if a global subscriber is already set this returns `Ok(())`,
/// so tests and libraries may call it freely.
pub fn init(config: LoggingConfig) -> StoreResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.with_file_and_line)
        .with_line_number(config.with_file_and_line);

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            // already initialized is expected when several components init
            if e
                .to_string()
                .contains("a global default trace dispatcher has already been set")
            {
                Ok(())
            } else {
                Err(StoreError::from(figment::Error::from(format!(
                    "Failed to initialize tracing: {}",
                    e
                ))))
            }
        })
}

/// Parse a level name, case-insensitively.
fn parse_log_level(level: &str) -> StoreResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(StoreError::from(figment::Error::from(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )))),
    }
}

fn parse_format(format: &str) -> StoreResult<OutputFormat> {
    match format.to_lowercase().as_str() {
        "pretty" => Ok(OutputFormat::Pretty),
        "compact" => Ok(OutputFormat::Compact),
        "json" => Ok(OutputFormat::Json),
        _ => Err(StoreError::from(figment::Error::from(format!(
            "Invalid log format '{}'. Must be one of: pretty, compact, json",
            format
        )))),
    }
}
