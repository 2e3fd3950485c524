//! Grid configuration management
//!
//! Handles loading configuration from defaults, a TOML file, `GRID_`
//! environment variables and CLI arguments, in that order of precedence
//! (later sources win).

use pricer_core::shard::MAX_HASH_MOD;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GRID";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: text, json")]
    InvalidLogFormat(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Configuration file error: {0}")]
    FileError(String),

    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Logging setup error: {0}")]
    Logging(String),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::InvalidLogLevel(s.to_string())),
        }
    }
}

impl LogLevel {
    /// Convert log level to tracing filter string
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    LogLevel::from_str(&s).map_err(serde::de::Error::custom)
}

fn deserialize_log_format<'de, D>(deserializer: D) -> Result<LogFormat, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    LogFormat::from_str(&s).map_err(serde::de::Error::custom)
}

/// Postgres connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/neutryx_grid".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 10,
        }
    }
}

/// Worker loop settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Identity recorded on leases and compute metadata
    pub worker_id: String,
    /// Lease duration granted by each claim
    pub lease_seconds: u64,
    /// Sleep between polls when nothing is claimable
    pub idle_sleep_seconds: f64,
    /// Pause after a failed task
    pub failure_pause_seconds: f64,
    /// Maximum stored length of `last_error`, in characters
    pub max_error_len: usize,
    /// Dead-letter not-found failures on first occurrence
    pub dead_letter_non_retryable: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            lease_seconds: 60,
            idle_sleep_seconds: 0.5,
            failure_pause_seconds: 1.0,
            max_error_len: 2000,
            dead_letter_non_retryable: false,
        }
    }
}

/// `<host>-<pid>`, falling back to `worker-<pid>`.
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Defaults applied to new runs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Shard count per product type
    pub hash_mod: u32,
    /// Claim budget per task
    pub max_attempts: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            hash_mod: 1,
            max_attempts: 3,
        }
    }
}

/// Requeue backoff. A zero base keeps immediate requeue.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_seconds: f64,
    pub backoff_max_seconds: f64,
    /// Fraction of the delay randomised, in `[0, 1]`
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_seconds: 0.0,
            backoff_max_seconds: 60.0,
            jitter_pct: 0.2,
        }
    }
}

/// Top-level grid configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
    pub runs: RunConfig,
    pub retry: RetryConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    #[serde(deserialize_with = "deserialize_log_format")]
    pub log_format: LogFormat,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            runs: RunConfig::default(),
            retry: RetryConfig::default(),
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
        }
    }
}

impl GridConfig {
    /// Create a new GridConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: GridConfig = toml::from_str(content)
            .map_err(|e| ConfigError::FileError(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileError(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::invalid("database.url", "must not be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid(
                "database.max_connections",
                "must be positive",
            ));
        }
        if self.worker.worker_id.trim().is_empty() {
            return Err(ConfigError::invalid("worker.worker_id", "must not be empty"));
        }
        if self.worker.lease_seconds == 0 {
            return Err(ConfigError::invalid("worker.lease_seconds", "must be positive"));
        }
        for (field, value) in [
            ("worker.idle_sleep_seconds", self.worker.idle_sleep_seconds),
            ("worker.failure_pause_seconds", self.worker.failure_pause_seconds),
            ("retry.backoff_base_seconds", self.retry.backoff_base_seconds),
            ("retry.backoff_max_seconds", self.retry.backoff_max_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be a non-negative number, got {}", value),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_pct) {
            return Err(ConfigError::invalid(
                "retry.jitter_pct",
                format!("must be within [0, 1], got {}", self.retry.jitter_pct),
            ));
        }
        if self.runs.hash_mod == 0 {
            return Err(ConfigError::invalid("runs.hash_mod", "must be positive"));
        }
        if self.runs.hash_mod > MAX_HASH_MOD {
            return Err(ConfigError::invalid(
                "runs.hash_mod",
                format!("must be at most {}, got {}", MAX_HASH_MOD, self.runs.hash_mod),
            ));
        }
        if self.runs.max_attempts == 0 {
            return Err(ConfigError::invalid("runs.max_attempts", "must be positive"));
        }
        Ok(())
    }

    /// Merge with CLI arguments (CLI takes precedence)
    pub fn merge_with_cli(&mut self, cli: &CliArgs) -> Result<(), ConfigError> {
        if let Some(url) = &cli.database_url {
            self.database.url = url.clone();
        }
        if let Some(worker_id) = &cli.worker_id {
            self.worker.worker_id = worker_id.clone();
        }
        if let Some(lease) = cli.lease_seconds {
            self.worker.lease_seconds = lease;
        }
        if let Some(idle) = cli.idle_sleep_seconds {
            self.worker.idle_sleep_seconds = idle;
        }
        if let Some(hash_mod) = cli.hash_mod {
            self.runs.hash_mod = hash_mod;
        }
        if let Some(max_attempts) = cli.max_attempts {
            self.runs.max_attempts = max_attempts;
        }
        if let Some(level) = &cli.log_level {
            self.log_level = LogLevel::from_str(level)?;
        }
        if let Some(format) = &cli.log_format {
            self.log_format = LogFormat::from_str(format)?;
        }
        Ok(())
    }
}

/// CLI arguments structure
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Config file path
    pub config_file: Option<PathBuf>,
    pub database_url: Option<String>,
    pub worker_id: Option<String>,
    pub lease_seconds: Option<u64>,
    pub idle_sleep_seconds: Option<f64>,
    pub hash_mod: Option<u32>,
    pub max_attempts: Option<u32>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

/// Build configuration from all sources
///
/// Priority (highest to lowest):
/// 1. CLI arguments
/// 2. Environment variables (`GRID_WORKER__LEASE_SECONDS=30`)
/// 3. Config file
/// 4. Default values
pub fn build_config(cli: &CliArgs) -> Result<GridConfig, ConfigError> {
    build_config_with_env(cli, None)
}

/// [`build_config`] with an explicit environment map instead of the process
/// environment.
pub fn build_config_with_env(
    cli: &CliArgs,
    env: Option<HashMap<String, String>>,
) -> Result<GridConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = &cli.config_file {
        if !path.exists() {
            return Err(ConfigError::FileError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(
            config::File::from(path.as_path()).format(config::FileFormat::Toml),
        );
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    let mut config: GridConfig = builder.build()?.try_deserialize()?;
    config.merge_with_cli(cli)?;
    config.validate()?;
    Ok(config)
}
