//! # infra_config: Configuration for the Valuation Grid
//!
//! Layered [`GridConfig`] (defaults, TOML file, `GRID_` environment, CLI) and
//! the tracing subscriber used by every binary.
//!
//! ```rust
//! use infra_config::GridConfig;
//!
//! let config = GridConfig::from_toml_str("[worker]\nlease_seconds = 30").unwrap();
//! assert_eq!(config.worker.lease_seconds, 30);
//! assert_eq!(config.runs.max_attempts, 3);
//! ```

pub mod config;
pub mod logging;

pub use config::{
    build_config, build_config_with_env, default_worker_id, CliArgs, ConfigError,
    DatabaseConfig, GridConfig, LogFormat, LogLevel, RetryConfig, RunConfig, WorkerConfig,
};
pub use logging::init_tracing;
