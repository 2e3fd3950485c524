//! # infra_store: Shared State for the Valuation Grid
//!
//! Every worker coordinates through the [`Store`] trait; there is no other
//! channel between them. Two implementations are provided:
//!
//! - [`PgStore`]: Postgres via `sqlx`, claims with `FOR UPDATE SKIP LOCKED`
//! - [`InMemoryStore`]: single-process, driven by a [`Clock`] for tests
//!
//! ## Tables
//!
//! | Table | Key | Written by |
//! |-------|-----|------------|
//! | `position_snapshot`, `market_snapshot` | content hash | ingestion |
//! | `run` | `run_id` | run decomposer, status refresh |
//! | `task` | `task_id` | run decomposer, claim, complete, fail |
//! | `result` | `(run_id, position_id, scenario_id)` | worker upserts |

pub mod clock;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use model::{
    ComputeMeta, CreateRunOutcome, FailAction, RunProgress, RunRecord, RunStatus, TaskRecord,
    TaskStatus, ValuationResult,
};
pub use postgres::{PgStore, PgStoreOptions};
pub use store::Store;
