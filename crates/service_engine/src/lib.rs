//! # service_engine: Run Decomposition and Task Execution
//!
//! ## Service Layer Role
//!
//! Sits on top of the store and pricer crates and provides the two halves of
//! the valuation grid:
//! - [`RunDecomposer`]: validates a [`RunRequest`] and fans it out into one
//!   task per `(product_type, bucket)` in a single transaction
//! - [`Worker`]: claims tasks, prices the positions each task owns and
//!   upserts results, with failures handled by a [`RetryPolicy`]
//!
//! Workers never talk to each other. Any number of them, in one process via
//! [`WorkerPool`] or across many, coordinate only through the store's claim
//! protocol.
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use infra_config::RunConfig;
//! use infra_store::{InMemoryStore, Store};
//! use pricer_dispatch::PricerRegistry;
//! use service_engine::{RunDecomposer, RunRequest, Worker, WorkerSettings};
//!
//! # async fn demo(positions: Vec<pricer_core::Position>) -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
//! let registry = Arc::new(PricerRegistry::with_defaults());
//!
//! let decomposer = RunDecomposer::new(Arc::clone(&store), RunConfig::default())
//!     .with_registry(Arc::clone(&registry));
//! decomposer
//!     .create_run(&RunRequest::inline("EOD-2024-06-28", "mkt-id", positions))
//!     .await?;
//!
//! let mut worker = Worker::new(store, registry, WorkerSettings::new("w1"));
//! worker.run_until_idle().await?;
//! # Ok(())
//! # }
//! ```

pub mod decomposer;
pub mod error;
pub mod pool;
pub mod request;
pub mod retry;
pub mod worker;

pub use decomposer::{
    ingest_market_snapshot, ingest_position_snapshot, task_id_for, CreatedRun, RunDecomposer,
};
pub use error::{truncate_error, EngineError, TaskError, TaskErrorKind};
pub use pool::WorkerPool;
pub use request::{PositionSource, RunRequest};
pub use retry::RetryPolicy;
pub use worker::{PollOutcome, Worker, WorkerSettings, WorkerStats, ENGINE_VERSION};
