//! In-memory store implementation for testing.
//!
//! [`InMemoryStore`] keeps every table behind a single mutex, so each trait
//! operation is atomic with respect to the others, including `claim_next`.
//!
//! ## Limitations
//!
//! - **Single-process only**: workers must share the same instance
//! - **No persistence**: all state is lost when the process exits

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pricer_core::types::{MarketSnapshot, PositionSnapshot};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    CreateRunOutcome, FailAction, RunProgress, RunRecord, RunStatus, TaskRecord, TaskStatus,
    ValuationResult,
};
use crate::store::Store;

type ResultKey = (String, String, String);

#[derive(Debug, Default)]
struct Tables {
    position_snapshots: HashMap<String, PositionSnapshot>,
    market_snapshots: HashMap<String, MarketSnapshot>,
    runs: HashMap<String, RunRecord>,
    tasks: HashMap<Uuid, TaskRecord>,
    results: BTreeMap<ResultKey, ValuationResult>,
}

/// In-memory [`Store`].
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poison_err<T>(_: PoisonError<T>) -> StoreError {
    StoreError::LockPoisoned
}

fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl InMemoryStore {
    /// Store driven by the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store driven by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(poison_err)
    }

    /// Replace a task row wholesale. Lets tests stage states such as an
    /// abandoned RUNNING lease.
    pub fn put_task(&self, task: TaskRecord) -> StoreResult<()> {
        self.lock()?.tasks.insert(task.task_id, task);
        Ok(())
    }

    /// Number of stored result rows across all runs.
    pub fn result_count(&self) -> StoreResult<usize> {
        Ok(self.lock()?.results.len())
    }
}

/// Claim order: oldest first, ties broken by product type then bucket.
fn fifo_key(t: &TaskRecord) -> (DateTime<Utc>, &str, u32) {
    (t.created_at, t.product_type.as_str(), t.hash_bucket)
}

fn progress(tables: &Tables, run_id: &str) -> RunProgress {
    RunProgress::from_statuses(
        tables
            .tasks
            .values()
            .filter(|t| t.run_id == run_id)
            .map(|t| t.status),
    )
}

#[async_trait]
impl Store for InMemoryStore {
    async fn migrate(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn put_position_snapshot(
        &self,
        id: &str,
        snapshot: &PositionSnapshot,
    ) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        if tables.position_snapshots.contains_key(id) {
            return Ok(false);
        }
        tables
            .position_snapshots
            .insert(id.to_string(), snapshot.clone());
        Ok(true)
    }

    async fn get_position_snapshot(&self, id: &str) -> StoreResult<Option<PositionSnapshot>> {
        Ok(self.lock()?.position_snapshots.get(id).cloned())
    }

    async fn put_market_snapshot(&self, id: &str, snapshot: &MarketSnapshot) -> StoreResult<bool> {
        let mut tables = self.lock()?;
        if tables.market_snapshots.contains_key(id) {
            return Ok(false);
        }
        tables
            .market_snapshots
            .insert(id.to_string(), snapshot.clone());
        Ok(true)
    }

    async fn get_market_snapshot(&self, id: &str) -> StoreResult<Option<MarketSnapshot>> {
        Ok(self.lock()?.market_snapshots.get(id).cloned())
    }

    async fn create_run(
        &self,
        run: &RunRecord,
        snapshot: Option<&PositionSnapshot>,
        tasks: &[TaskRecord],
    ) -> StoreResult<CreateRunOutcome> {
        let mut tables = self.lock()?;
        let mut outcome = CreateRunOutcome::default();

        if let Some(snapshot) = snapshot {
            if !tables
                .position_snapshots
                .contains_key(&run.position_snapshot_id)
            {
                tables
                    .position_snapshots
                    .insert(run.position_snapshot_id.clone(), snapshot.clone());
                outcome.snapshot_inserted = true;
            }
        }

        if !tables.runs.contains_key(&run.run_id) {
            tables.runs.insert(run.run_id.clone(), run.clone());
            outcome.run_inserted = true;
        }

        for task in tasks {
            if !tables.tasks.contains_key(&task.task_id) {
                tables.tasks.insert(task.task_id, task.clone());
                outcome.tasks_inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        Ok(self.lock()?.runs.get(run_id).cloned())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<Option<TaskRecord>> {
        let now = self.clock.now();
        let mut tables = self.lock()?;

        let next = tables
            .tasks
            .values()
            .filter(|t| t.is_claimable(now))
            .min_by(|a, b| fifo_key(a).cmp(&fifo_key(b)))
            .map(|t| t.task_id);

        let Some(task_id) = next else {
            return Ok(None);
        };
        let Some(task) = tables.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        task.status = TaskStatus::Running;
        task.attempt += 1;
        task.leased_until = Some(after(now, lease));
        task.leased_by = Some(worker_id.to_string());
        task.updated_at = now;
        Ok(Some(task.clone()))
    }

    async fn complete_task(&self, task_id: Uuid, attempt: u32) -> StoreResult<bool> {
        let now = self.clock.now();
        let mut tables = self.lock()?;
        match tables.tasks.get_mut(&task_id) {
            Some(task) if task.status == TaskStatus::Running && task.attempt == attempt => {
                task.status = TaskStatus::Succeeded;
                task.leased_until = None;
                task.last_error = None;
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        attempt: u32,
        error: &str,
        action: FailAction,
    ) -> StoreResult<Option<TaskStatus>> {
        let now = self.clock.now();
        let mut tables = self.lock()?;
        let Some(task) = tables.tasks.get_mut(&task_id) else {
            return Ok(None);
        };
        if task.status != TaskStatus::Running || task.attempt != attempt {
            return Ok(None);
        }

        task.last_error = Some(error.to_string());
        task.leased_until = None;
        task.updated_at = now;
        task.status = match action {
            FailAction::DeadLetter => TaskStatus::Dead,
            FailAction::Requeue { delay } => {
                task.available_at = after(now, delay);
                TaskStatus::Queued
            }
        };
        Ok(Some(task.status))
    }

    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<TaskRecord>> {
        Ok(self.lock()?.tasks.get(&task_id).cloned())
    }

    async fn list_tasks(&self, run_id: &str) -> StoreResult<Vec<TaskRecord>> {
        let mut tasks: Vec<_> = self
            .lock()?
            .tasks
            .values()
            .filter(|t| t.run_id == run_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| fifo_key(a).cmp(&fifo_key(b)));
        Ok(tasks)
    }

    async fn upsert_result(&self, result: &ValuationResult) -> StoreResult<()> {
        let now = self.clock.now();
        let mut tables = self.lock()?;
        let key = result.key();
        let created_at = tables
            .results
            .get(&key)
            .map(|r| r.created_at)
            .unwrap_or(now);
        let mut row = result.clone();
        row.created_at = created_at;
        row.updated_at = now;
        tables.results.insert(key, row);
        Ok(())
    }

    async fn get_result(
        &self,
        run_id: &str,
        position_id: &str,
        scenario_id: &str,
    ) -> StoreResult<Option<ValuationResult>> {
        let key = (
            run_id.to_string(),
            position_id.to_string(),
            scenario_id.to_string(),
        );
        Ok(self.lock()?.results.get(&key).cloned())
    }

    async fn list_results(&self, run_id: &str) -> StoreResult<Vec<ValuationResult>> {
        Ok(self
            .lock()?
            .results
            .values()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn run_progress(&self, run_id: &str) -> StoreResult<RunProgress> {
        let tables = self.lock()?;
        Ok(progress(&tables, run_id))
    }

    async fn refresh_run_status(&self, run_id: &str) -> StoreResult<RunStatus> {
        let now = self.clock.now();
        let mut tables = self.lock()?;
        let status = progress(&tables, run_id).status();
        if let Some(run) = tables.runs.get_mut(run_id) {
            run.status = status;
            run.updated_at = now;
        }
        Ok(status)
    }
}
