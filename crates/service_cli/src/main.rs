//! Neutryx Grid CLI - Operations for the Distributed Valuation Grid
//!
//! This is the operational entry point for the valuation grid.
//!
//! # Commands
//!
//! - `neutryx-grid migrate` - Create or upgrade the store schema
//! - `neutryx-grid load-market <file>` - Ingest a market snapshot
//! - `neutryx-grid load-positions <file>` - Ingest a position snapshot
//! - `neutryx-grid submit <request>` - Create a run and fan it out into tasks
//! - `neutryx-grid work --workers <n>` - Run worker loops until Ctrl-C
//! - `neutryx-grid status <run_id>` - Show task counts and dead tasks
//! - `neutryx-grid results <run_id>` - Dump valuation results as JSON
//!
//! # Architecture
//!
//! As part of the **S**ervice layer in the A-I-P-S architecture, this crate
//! wires configuration, the Postgres store, the pricer registry and the
//! engine together. It holds no state of its own.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use infra_config::{build_config, init_tracing, CliArgs};
use tracing::{debug, info};

mod commands;
mod error;

pub use error::{CliError, Result};

/// Neutryx valuation grid CLI
#[derive(Parser, Debug)]
#[command(name = "neutryx-grid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML format)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Postgres connection URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or upgrade the store schema
    Migrate,

    /// Ingest a market snapshot from a JSON file and print its id
    LoadMarket {
        /// Path to the market snapshot
        file: PathBuf,
    },

    /// Ingest a position snapshot from a JSON file and print its id
    LoadPositions {
        /// Path to the position snapshot
        file: PathBuf,
    },

    /// Create a run from a JSON run request
    Submit {
        /// Path to the run request
        request: PathBuf,

        /// JSON array of positions to use instead of the request's source
        #[arg(short, long)]
        positions: Option<PathBuf>,

        /// Shard count for runs that do not set one
        #[arg(long)]
        hash_mod: Option<u32>,

        /// Attempt budget for runs that do not set one
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Claim and execute tasks
    Work {
        /// Number of worker loops in this process
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Drain the queue once with a single worker, then exit
        #[arg(long)]
        until_idle: bool,

        /// Worker identity recorded on leases and results
        #[arg(long)]
        worker_id: Option<String>,

        /// Lease duration in seconds
        #[arg(long)]
        lease_seconds: Option<u64>,

        /// Sleep between empty polls, in seconds
        #[arg(long)]
        idle_sleep_seconds: Option<f64>,
    },

    /// Show a run's status
    Status {
        run_id: String,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Print a run's results as JSON
    Results {
        run_id: String,

        /// Only this scenario
        #[arg(short, long)]
        scenario: Option<String>,
    },
}

impl From<&Cli> for CliArgs {
    fn from(cli: &Cli) -> Self {
        let mut args = CliArgs {
            config_file: cli.config.clone(),
            database_url: cli.database_url.clone(),
            log_level: cli.log_level.clone(),
            log_format: cli.log_format.clone(),
            ..CliArgs::default()
        };
        match &cli.command {
            Commands::Submit {
                hash_mod,
                max_attempts,
                ..
            } => {
                args.hash_mod = *hash_mod;
                args.max_attempts = *max_attempts;
            }
            Commands::Work {
                worker_id,
                lease_seconds,
                idle_sleep_seconds,
                ..
            } => {
                args.worker_id = worker_id.clone();
                args.lease_seconds = *lease_seconds;
                args.idle_sleep_seconds = *idle_sleep_seconds;
            }
            _ => {}
        }
        args
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = build_config(&CliArgs::from(&cli))?;
    init_tracing(config.log_level, config.log_format)?;

    info!("Neutryx Grid v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        max_connections = config.database.max_connections,
        worker_id = %config.worker.worker_id,
        hash_mod = config.runs.hash_mod,
        max_attempts = config.runs.max_attempts,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Migrate => commands::migrate::run(&config).await?,
        Commands::LoadMarket { file } => commands::load::market(&config, &file).await?,
        Commands::LoadPositions { file } => commands::load::positions(&config, &file).await?,
        Commands::Submit {
            request, positions, ..
        } => commands::submit::run(&config, &request, positions.as_deref()).await?,
        Commands::Work {
            workers,
            until_idle,
            ..
        } => commands::work::run(&config, workers, until_idle).await?,
        Commands::Status { run_id, format } => {
            commands::status::run(&config, &run_id, &format).await?
        }
        Commands::Results { run_id, scenario } => {
            commands::results::run(&config, &run_id, scenario.as_deref()).await?
        }
    }
    Ok(())
}
