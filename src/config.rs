//! Configuration management for range-vector query execution
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.
//!
//! ```toml
//! [query]
//! max_parallelism = 8
//! timeout_ms = 30000
//! max_samples = 1000000
//! lookback_delta_ms = 300000
//! default_function = "rate"
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{Error, Result};
use crate::query::functions::{window_function, DEFAULT_FUNCTION};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query execution settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Query execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Number of shards evaluated in parallel
    #[serde(default = "default_parallelism")]
    pub max_parallelism: usize,

    /// Query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum points selected in one step (0 = unlimited)
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Lookback window of instant vector selectors in milliseconds
    #[serde(default = "default_lookback_delta_ms")]
    pub lookback_delta_ms: i64,

    /// Window function used when a query names none
    #[serde(default = "default_function")]
    pub default_function: String,

    /// Run shards on the thread pool
    #[serde(default = "default_true")]
    pub enable_parallel: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Include the event target in log lines
    #[serde(default = "default_true")]
    pub with_target: bool,

    /// Colorize output
    #[serde(default)]
    pub ansi: bool,
}

// Default value functions
fn default_parallelism() -> usize { num_cpus::get() }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_max_samples() -> usize { 50_000_000 }
fn default_lookback_delta_ms() -> i64 { 300_000 }
fn default_function() -> String { DEFAULT_FUNCTION.to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_true() -> bool { true }

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_parallelism: default_parallelism(),
            timeout_ms: default_timeout_ms(),
            max_samples: default_max_samples(),
            lookback_delta_ms: default_lookback_delta_ms(),
            default_function: default_function(),
            enable_parallel: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: true,
            ansi: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Query
        if let Ok(v) = std::env::var("RANGEVEC_MAX_PARALLELISM") {
            if let Ok(p) = v.parse() {
                self.query.max_parallelism = p;
            }
        }
        if let Ok(v) = std::env::var("RANGEVEC_TIMEOUT_MS") {
            if let Ok(t) = v.parse() {
                self.query.timeout_ms = t;
            }
        }
        if let Ok(v) = std::env::var("RANGEVEC_MAX_SAMPLES") {
            if let Ok(s) = v.parse() {
                self.query.max_samples = s;
            }
        }
        if let Ok(v) = std::env::var("RANGEVEC_LOOKBACK_DELTA_MS") {
            if let Ok(l) = v.parse() {
                self.query.lookback_delta_ms = l;
            }
        }
        if let Ok(v) = std::env::var("RANGEVEC_ENABLE_PARALLEL") {
            if let Ok(enable) = v.parse() {
                self.query.enable_parallel = enable;
            }
        }
        if let Ok(function) = std::env::var("RANGEVEC_DEFAULT_FUNCTION") {
            self.query.default_function = function;
        }

        // Logging
        if let Ok(level) = std::env::var("RANGEVEC_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.query.max_parallelism == 0 {
            return Err(Error::Configuration(
                "Max parallelism must be > 0".to_string(),
            ));
        }
        if self.query.timeout_ms == 0 {
            return Err(Error::Configuration("Timeout must be > 0".to_string()));
        }
        if self.query.lookback_delta_ms <= 0 {
            return Err(Error::Configuration(
                "Lookback delta must be > 0".to_string(),
            ));
        }
        if window_function(&self.query.default_function, 0).is_none() {
            return Err(Error::Configuration(format!(
                "Unknown default function '{}'",
                self.query.default_function
            )));
        }
        if EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(Error::Configuration(format!(
                "Invalid log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false`
/// if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .is_ok()
}
