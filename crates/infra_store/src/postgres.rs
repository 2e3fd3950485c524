//! Postgres store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never wait on
//! each other's candidate rows. Lease arithmetic uses the database clock.

use std::time::Duration;

use async_trait::async_trait;
use pricer_core::types::{MarketSnapshot, Measures, PositionSnapshot};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    ComputeMeta, CreateRunOutcome, FailAction, RunProgress, RunRecord, RunStatus, TaskRecord,
    TaskStatus, ValuationResult,
};
use crate::store::Store;

const SCHEMA: &str = include_str!("../migrations/0001_grid_schema.sql");

const TASK_COLUMNS: &str = "task_id, run_id, portfolio_node_id, product_type, \
    position_snapshot_id, hash_mod, hash_bucket, status, attempt, max_attempts, \
    leased_until, leased_by, available_at, last_error, created_at, updated_at";

const RESULT_COLUMNS: &str = "run_id, position_id, scenario_id, instrument_id, \
    portfolio_node_id, product_type, base_ccy, measures, compute_meta, input_hash, \
    created_at, updated_at";

const CLAIM_SQL: &str = "
WITH next AS (
    SELECT task_id
    FROM task
    WHERE (status = 'QUEUED' AND available_at <= now())
       OR (status = 'RUNNING' AND leased_until < now())
    ORDER BY created_at, product_type, hash_bucket
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE task t
SET status = 'RUNNING',
    attempt = t.attempt + 1,
    leased_until = now() + make_interval(secs => $2),
    leased_by = $1,
    updated_at = now()
FROM next
WHERE t.task_id = next.task_id
RETURNING t.task_id, t.run_id, t.portfolio_node_id, t.product_type,
          t.position_snapshot_id, t.hash_mod, t.hash_bucket, t.status, t.attempt,
          t.max_attempts, t.leased_until, t.leased_by, t.available_at, t.last_error,
          t.created_at, t.updated_at";

/// Connection settings for [`PgStore::connect`].
#[derive(Debug, Clone)]
pub struct PgStoreOptions {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

/// [`Store`] backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a pool.
    pub async fn connect(options: &PgStoreOptions) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(&options.url)
            .await?;
        debug!(max_connections = options.max_connections, "Postgres pool opened");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn u32_col(row: &PgRow, col: &str) -> StoreResult<u32> {
    let v: i32 = row.try_get(col)?;
    u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("{} = {}", col, v)))
}

fn i32_param(field: &str, v: u32) -> StoreResult<i32> {
    i32::try_from(v).map_err(|_| StoreError::Corrupt(format!("{} = {} overflows INTEGER", field, v)))
}

fn task_from_row(row: &PgRow) -> StoreResult<TaskRecord> {
    let status: String = row.try_get("status")?;
    Ok(TaskRecord {
        task_id: row.try_get("task_id")?,
        run_id: row.try_get("run_id")?,
        portfolio_node_id: row.try_get("portfolio_node_id")?,
        product_type: row.try_get("product_type")?,
        position_snapshot_id: row.try_get("position_snapshot_id")?,
        hash_mod: u32_col(row, "hash_mod")?,
        hash_bucket: u32_col(row, "hash_bucket")?,
        status: status.parse()?,
        attempt: u32_col(row, "attempt")?,
        max_attempts: u32_col(row, "max_attempts")?,
        leased_until: row.try_get("leased_until")?,
        leased_by: row.try_get("leased_by")?,
        available_at: row.try_get("available_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn run_from_row(row: &PgRow) -> StoreResult<RunRecord> {
    let status: String = row.try_get("status")?;
    let measures: Json<Vec<String>> = row.try_get("measures")?;
    let scenarios: Json<Vec<String>> = row.try_get("scenarios")?;
    let scope: Json<Vec<String>> = row.try_get("portfolio_scope")?;
    Ok(RunRecord {
        run_id: row.try_get("run_id")?,
        run_type: row.try_get("run_type")?,
        as_of_time: row.try_get("as_of_time")?,
        market_snapshot_id: row.try_get("market_snapshot_id")?,
        position_snapshot_id: row.try_get("position_snapshot_id")?,
        measures: measures.0,
        scenarios: scenarios.0,
        portfolio_scope: scope.0,
        hash_mod: u32_col(row, "hash_mod")?,
        max_attempts: u32_col(row, "max_attempts")?,
        status: status.parse()?,
        requested_by: row.try_get("requested_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn progress_from_rows(rows: &[PgRow]) -> StoreResult<RunProgress> {
    let mut progress = RunProgress::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        progress.add(status.parse()?, n.max(0) as u64);
    }
    Ok(progress)
}

fn result_from_row(row: &PgRow) -> StoreResult<ValuationResult> {
    let measures: Json<Measures> = row.try_get("measures")?;
    let meta: Json<ComputeMeta> = row.try_get("compute_meta")?;
    Ok(ValuationResult {
        run_id: row.try_get("run_id")?,
        position_id: row.try_get("position_id")?,
        scenario_id: row.try_get("scenario_id")?,
        instrument_id: row.try_get("instrument_id")?,
        portfolio_node_id: row.try_get("portfolio_node_id")?,
        product_type: row.try_get("product_type")?,
        base_ccy: row.try_get("base_ccy")?,
        measures: measures.0,
        compute_meta: meta.0,
        input_hash: row.try_get("input_hash")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        info!("Schema migrated");
        Ok(())
    }

    async fn put_position_snapshot(
        &self,
        id: &str,
        snapshot: &PositionSnapshot,
    ) -> StoreResult<bool> {
        let done = sqlx::query(
            "INSERT INTO position_snapshot (snapshot_id, payload) VALUES ($1, $2)
             ON CONFLICT (snapshot_id) DO NOTHING",
        )
        .bind(id)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn get_position_snapshot(&self, id: &str) -> StoreResult<Option<PositionSnapshot>> {
        let row = sqlx::query("SELECT payload FROM position_snapshot WHERE snapshot_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get::<Json<PositionSnapshot>, _>("payload")?.0)),
            None => Ok(None),
        }
    }

    async fn put_market_snapshot(&self, id: &str, snapshot: &MarketSnapshot) -> StoreResult<bool> {
        let done = sqlx::query(
            "INSERT INTO market_snapshot (snapshot_id, payload) VALUES ($1, $2)
             ON CONFLICT (snapshot_id) DO NOTHING",
        )
        .bind(id)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn get_market_snapshot(&self, id: &str) -> StoreResult<Option<MarketSnapshot>> {
        let row = sqlx::query("SELECT payload FROM market_snapshot WHERE snapshot_id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(r.try_get::<Json<MarketSnapshot>, _>("payload")?.0)),
            None => Ok(None),
        }
    }

    async fn create_run(
        &self,
        run: &RunRecord,
        snapshot: Option<&PositionSnapshot>,
        tasks: &[TaskRecord],
    ) -> StoreResult<CreateRunOutcome> {
        let mut outcome = CreateRunOutcome::default();
        let mut tx = self.pool.begin().await?;

        if let Some(snapshot) = snapshot {
            let done = sqlx::query(
                "INSERT INTO position_snapshot (snapshot_id, payload) VALUES ($1, $2)
                 ON CONFLICT (snapshot_id) DO NOTHING",
            )
            .bind(&run.position_snapshot_id)
            .bind(Json(snapshot))
            .execute(&mut *tx)
            .await?;
            outcome.snapshot_inserted = done.rows_affected() == 1;
        }

        let done = sqlx::query(
            "INSERT INTO run (run_id, run_type, as_of_time, market_snapshot_id,
                 position_snapshot_id, measures, scenarios, portfolio_scope, hash_mod,
                 max_attempts, status, requested_by, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now())
             ON CONFLICT (run_id) DO NOTHING",
        )
        .bind(&run.run_id)
        .bind(&run.run_type)
        .bind(run.as_of_time)
        .bind(&run.market_snapshot_id)
        .bind(&run.position_snapshot_id)
        .bind(Json(&run.measures))
        .bind(Json(&run.scenarios))
        .bind(Json(&run.portfolio_scope))
        .bind(i32_param("hash_mod", run.hash_mod)?)
        .bind(i32_param("max_attempts", run.max_attempts)?)
        .bind(run.status.as_str())
        .bind(&run.requested_by)
        .execute(&mut *tx)
        .await?;
        outcome.run_inserted = done.rows_affected() == 1;

        for task in tasks {
            let done = sqlx::query(
                "INSERT INTO task (task_id, run_id, portfolio_node_id, product_type,
                     position_snapshot_id, hash_mod, hash_bucket, status, attempt,
                     max_attempts, available_at, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, 'QUEUED', 0, $8, now(), now(), now())
                 ON CONFLICT (task_id) DO NOTHING",
            )
            .bind(task.task_id)
            .bind(&task.run_id)
            .bind(&task.portfolio_node_id)
            .bind(&task.product_type)
            .bind(&task.position_snapshot_id)
            .bind(i32_param("hash_mod", task.hash_mod)?)
            .bind(i32_param("hash_bucket", task.hash_bucket)?)
            .bind(i32_param("max_attempts", task.max_attempts)?)
            .execute(&mut *tx)
            .await?;
            outcome.tasks_inserted += done.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_run(&self, run_id: &str) -> StoreResult<Option<RunRecord>> {
        let row = sqlx::query("SELECT * FROM run WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
    ) -> StoreResult<Option<TaskRecord>> {
        let row = sqlx::query(CLAIM_SQL)
            .bind(worker_id)
            .bind(lease.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn complete_task(&self, task_id: Uuid, attempt: u32) -> StoreResult<bool> {
        let done = sqlx::query(
            "UPDATE task
             SET status = 'SUCCEEDED', leased_until = NULL, last_error = NULL, updated_at = now()
             WHERE task_id = $1 AND status = 'RUNNING' AND attempt = $2",
        )
        .bind(task_id)
        .bind(i32_param("attempt", attempt)?)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        attempt: u32,
        error: &str,
        action: FailAction,
    ) -> StoreResult<Option<TaskStatus>> {
        let mut tx = self.pool.begin().await?;

        let done = sqlx::query(
            "UPDATE task
             SET status = 'FAILED', last_error = $3, leased_until = NULL, updated_at = now()
             WHERE task_id = $1 AND status = 'RUNNING' AND attempt = $2",
        )
        .bind(task_id)
        .bind(i32_param("attempt", attempt)?)
        .bind(error)
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let status = match action {
            FailAction::DeadLetter => {
                sqlx::query(
                    "UPDATE task SET status = 'DEAD', updated_at = now()
                     WHERE task_id = $1 AND status = 'FAILED'",
                )
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
                TaskStatus::Dead
            }
            FailAction::Requeue { delay } => {
                sqlx::query(
                    "UPDATE task
                     SET status = 'QUEUED', available_at = now() + make_interval(secs => $2),
                         updated_at = now()
                     WHERE task_id = $1 AND status = 'FAILED'",
                )
                .bind(task_id)
                .bind(delay.as_secs_f64())
                .execute(&mut *tx)
                .await?;
                TaskStatus::Queued
            }
        };

        tx.commit().await?;
        Ok(Some(status))
    }

    async fn get_task(&self, task_id: Uuid) -> StoreResult<Option<TaskRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM task WHERE task_id = $1", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn list_tasks(&self, run_id: &str) -> StoreResult<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task WHERE run_id = $1 ORDER BY created_at, product_type, hash_bucket",
            TASK_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn upsert_result(&self, result: &ValuationResult) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO result (run_id, position_id, scenario_id, instrument_id,
                 portfolio_node_id, product_type, base_ccy, measures, compute_meta,
                 input_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now(), now())
             ON CONFLICT (run_id, position_id, scenario_id) DO UPDATE SET
                 instrument_id = EXCLUDED.instrument_id,
                 portfolio_node_id = EXCLUDED.portfolio_node_id,
                 product_type = EXCLUDED.product_type,
                 base_ccy = EXCLUDED.base_ccy,
                 measures = EXCLUDED.measures,
                 compute_meta = EXCLUDED.compute_meta,
                 input_hash = EXCLUDED.input_hash,
                 updated_at = now()",
        )
        .bind(&result.run_id)
        .bind(&result.position_id)
        .bind(&result.scenario_id)
        .bind(&result.instrument_id)
        .bind(&result.portfolio_node_id)
        .bind(&result.product_type)
        .bind(&result.base_ccy)
        .bind(Json(&result.measures))
        .bind(Json(&result.compute_meta))
        .bind(&result.input_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_result(
        &self,
        run_id: &str,
        position_id: &str,
        scenario_id: &str,
    ) -> StoreResult<Option<ValuationResult>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM result WHERE run_id = $1 AND position_id = $2 AND scenario_id = $3",
            RESULT_COLUMNS
        ))
        .bind(run_id)
        .bind(position_id)
        .bind(scenario_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(result_from_row).transpose()
    }

    async fn list_results(&self, run_id: &str) -> StoreResult<Vec<ValuationResult>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM result WHERE run_id = $1 ORDER BY position_id, scenario_id",
            RESULT_COLUMNS
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn run_progress(&self, run_id: &str) -> StoreResult<RunProgress> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM task WHERE run_id = $1 GROUP BY status")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        progress_from_rows(&rows)
    }

    async fn refresh_run_status(&self, run_id: &str) -> StoreResult<RunStatus> {
        // Refreshes of one run serialise on the run row; the counts are read
        // after the lock so the last writer always sees the final task states.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT run_id FROM run WHERE run_id = $1 FOR UPDATE")
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?;

        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM task WHERE run_id = $1 GROUP BY status")
            .bind(run_id)
            .fetch_all(&mut *tx)
            .await?;
        let status = progress_from_rows(&rows)?.status();

        sqlx::query("UPDATE run SET status = $2, updated_at = now() WHERE run_id = $1")
            .bind(run_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(status)
    }
}
