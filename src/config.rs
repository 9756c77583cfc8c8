//! Store configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/store.toml` by default)
//! 2. environment variables prefixed with `CROSSBAR_STORE_`, using `__` to
//!    separate nested keys
//!
//! # Example
//! ```no_run
//! use crossbar_store::config::StoreConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::load()?;
//! config.validate()?;
//! println!("new logs start with {} rows", config.storage.base_size);
//! # Ok(())
//! # }
//! ```

use crate::error::{StoreError, StoreResult};
use crate::store::schema::DEFAULT_BASE_SIZE;
use crate::store::Dimensions;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment overrides, e.g. `CROSSBAR_STORE_STORAGE__BASE_SIZE`.
pub const ENV_PREFIX: &str = "CROSSBAR_STORE_";

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/store.toml";

/// Top-level store configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Layout of new stores
    #[serde(default)]
    pub storage: StorageSection,
    /// Logging settings for applications embedding the store
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSection {
    /// Initial capacity of a new time-series log, and its growth base
    #[serde(default = "default_base_size")]
    pub base_size: usize,
    /// Word lines of newly created stores
    #[serde(default = "default_lines")]
    pub words: u32,
    /// Bit lines of newly created stores
    #[serde(default = "default_lines")]
    pub bits: u32,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_format")]
    pub format: String,
}

fn invalid(message: String) -> StoreError {
    StoreError::from(figment::Error::from(message))
}

// Default value functions
fn default_base_size() -> usize {
    DEFAULT_BASE_SIZE
}

fn default_lines() -> u32 {
    32
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_size: default_base_size(),
            words: default_lines(),
            bits: default_lines(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from `config/store.toml` and environment variables
    pub fn load() -> StoreResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file leaves
    /// the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// Provider chain: defaults, then the file, then the environment.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(StoreConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> StoreResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        if self.storage.base_size == 0 {
            return Err(invalid("base_size must be at least 1".to_string()));
        }

        if self.storage.words == 0 || self.storage.bits == 0 {
            return Err(invalid(format!(
                "crossbar must have at least one word and one bit, got {}×{}",
                self.storage.words, self.storage.bits
            )));
        }

        Ok(())
    }

    /// Dimensions for newly created stores
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.storage.words, self.storage.bits)
    }

    /// Render as TOML, e.g. to write out a starting configuration file
    pub fn to_toml(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Format(e.to_string()))
    }
}
