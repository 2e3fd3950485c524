//! The `Store` trait.
//!
//! All coordination between workers goes through these operations. Every
//! implementation must provide:
//!
//! - **Atomic fan-out**: `create_run` writes the snapshot, run and tasks
//!   together or not at all, and is a no-op for rows that already exist.
//! - **Exclusive claims**: two concurrent `claim_next` calls never return the
//!   same task under the same lease, and never block on each other.
//! - **Fenced transitions**: `complete_task` and `fail_task` only act on a
//!   task that is still RUNNING under the caller's attempt.
//! - **Idempotent results**: `upsert_result` leaves exactly one row per
//!   `(run_id, position_id, scenario_id)`.

use std::time::Duration;

use async_trait::async_trait;
use pricer_core::types::{MarketSnapshot, PositionSnapshot};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{
    CreateRunOutcome, FailAction, RunProgress, RunRecord, RunStatus, TaskRecord, TaskStatus,
    ValuationResult,
};

/// Shared task, run, snapshot and result storage.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create or upgrade the schema.
    async fn migrate(&self) -> StoreResult<()>;

    /// Store a position snapshot under its content id. Returns `false` when
    /// it already existed.
    async fn put_position_snapshot(&self, id: &str, snapshot: &PositionSnapshot)
        -> StoreResult<bool>;

    async fn get_position_snapshot(&self, id: &str) -> StoreResult<Option<PositionSnapshot>>;

    /// Store a market snapshot under its content id. Returns `false` when it
    /// already existed.
    async fn put_market_snapshot(&self, id: &str, snapshot: &MarketSnapshot) -> StoreResult<bool>;

    async fn get_market_snapshot(&self, id: &str) -> StoreResult<Option<MarketSnapshot>>;

    /// Write the run, optionally its position snapshot, and its tasks in one
    /// transaction. Existing rows are left untouched.
    async fn create_run(
        &self,
        run: &RunRecord,
        snapshot: Option<&PositionSnapshot>,
        tasks: &[TaskRecord],
    ) -> StoreResult<CreateRunOutcome>;

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<RunRecord>>;

    /// Atomically take the oldest claimable task: QUEUED and available, or
    /// RUNNING with an expired lease. The claim sets RUNNING, a lease of
    /// `lease` from now, `leased_by = worker_id`, and increments `attempt`.
    async fn claim_next(&self, worker_id: &str, lease: Duration)
        -> StoreResult<Option<TaskRecord>>;

    /// RUNNING → SUCCEEDED for the claim made at `attempt`. Returns `false`
    /// when the claim is no longer current.
    async fn complete_task(&self, task_id: Uuid, attempt: u32) -> StoreResult<bool>;

    /// RUNNING → FAILED → QUEUED, or RUNNING → DEAD, recording `error`.
    /// Returns the resulting status, or `None` when the claim is no longer
    /// current.
    async fn fail_task(
        &self,
        task_id: Uuid,
        attempt: u32,
        error: &str,
        action: FailAction,
    ) -> StoreResult<Option<TaskStatus>>;

    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<TaskRecord>>;

    /// Tasks of a run, oldest first.
    async fn list_tasks(&self, run_id: &str) -> StoreResult<Vec<TaskRecord>>;

    /// Insert or replace the row for the result's key. `created_at` of an
    /// existing row is kept.
    async fn upsert_result(&self, result: &ValuationResult) -> StoreResult<()>;

    async fn get_result(
        &self,
        run_id: &str,
        position_id: &str,
        scenario_id: &str,
    ) -> StoreResult<Option<ValuationResult>>;

    /// Results of a run ordered by position then scenario.
    async fn list_results(&self, run_id: &str) -> StoreResult<Vec<ValuationResult>>;

    async fn run_progress(&self, run_id: &str) -> StoreResult<RunProgress>;

    /// Recompute the run's aggregate status from its tasks and persist it.
    async fn refresh_run_status(&self, run_id: &str) -> StoreResult<RunStatus>;
}
