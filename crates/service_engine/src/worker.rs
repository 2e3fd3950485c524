//! Worker loop.
//!
//! A worker repeatedly claims one task, prices every `(scenario, position)`
//! pair the task owns, upserts the results and marks the task SUCCEEDED. Any
//! failure inside that boundary is recorded on the task, which is then
//! requeued or dead-lettered according to the [`RetryPolicy`]. Failures of
//! the surrounding loop (claiming, recording a failure) are logged and left
//! to lease expiry.
//!
//! ```text
//! Idle ──claim──▶ Claimed ──load──▶ Executing ──▶ Succeeded ──▶ Idle
//!   ▲                │                  │
//!   └──── pause ◀────┴──── Failed ◀─────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use infra_config::WorkerConfig;
use infra_store::{
    ComputeMeta, FailAction, StoreError, Store, TaskRecord, TaskStatus, ValuationResult,
};
use pricer_core::hashing::content_hash;
use pricer_core::shard::ShardKey;
use pricer_core::types::{Instrument, Position};
use pricer_dispatch::PricerRegistry;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument as _};
use uuid::Uuid;

use crate::error::{truncate_error, TaskError};
use crate::retry::RetryPolicy;

/// Recorded in every result's compute metadata.
pub const ENGINE_VERSION: &str = concat!("neutryx-grid/", env!("CARGO_PKG_VERSION"));

/// Per-worker knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub worker_id: String,
    pub lease: Duration,
    pub idle_sleep: Duration,
    pub failure_pause: Duration,
    /// Characters of error text kept in `last_error`
    pub max_error_len: usize,
}

impl WorkerSettings {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self::from_config(&WorkerConfig {
            worker_id: worker_id.into(),
            ..WorkerConfig::default()
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone(),
            lease: Duration::from_secs(config.lease_seconds),
            idle_sleep: Duration::try_from_secs_f64(config.idle_sleep_seconds)
                .unwrap_or(Duration::ZERO),
            failure_pause: Duration::try_from_secs_f64(config.failure_pause_seconds)
                .unwrap_or(Duration::ZERO),
            max_error_len: config.max_error_len,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn with_failure_pause(mut self, failure_pause: Duration) -> Self {
        self.failure_pause = failure_pause;
        self
    }
}

/// What one poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was claimable
    Idle,
    Succeeded(Uuid),
    /// Failed and put back in the queue
    Requeued(Uuid),
    /// Failed for the last time
    Dead(Uuid),
    /// The claim was taken over before the task could be finalized
    LostLease(Uuid),
}

/// Counters for one worker, or summed over a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub requeued: u64,
    pub dead: u64,
    pub lost_leases: u64,
    pub results_written: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: &WorkerStats) {
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.requeued += other.requeued;
        self.dead += other.dead;
        self.lost_leases += other.lost_leases;
        self.results_written += other.results_written;
    }
}

#[derive(Serialize)]
struct HashInput<'a> {
    run_id: &'a str,
    position: &'a Position,
    instrument: &'a Instrument,
    market_snapshot_id: &'a str,
    scenario_id: &'a str,
}

/// One cooperative polling loop. Tasks are processed strictly one at a time.
pub struct Worker {
    store: Arc<dyn Store>,
    registry: Arc<PricerRegistry>,
    settings: WorkerSettings,
    retry: RetryPolicy,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<PricerRegistry>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            retry: RetryPolicy::default(),
            stats: WorkerStats::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.settings.worker_id
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Claim and fully process at most one task.
    ///
    /// Errors are returned only when the claim itself, or recording a task
    /// failure, hits the store. The task is then left for lease expiry.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, StoreError> {
        let Some(task) = self
            .store
            .claim_next(&self.settings.worker_id, self.settings.lease)
            .await?
        else {
            return Ok(PollOutcome::Idle);
        };
        self.stats.claimed += 1;

        let span = info_span!(
            "task",
            task_id = %task.task_id,
            run_id = %task.run_id,
            product_type = %task.product_type,
            bucket = task.hash_bucket,
            attempt = task.attempt,
        );
        self.process(task).instrument(span).await
    }

    async fn process(&mut self, task: TaskRecord) -> Result<PollOutcome, StoreError> {
        debug!(worker_id = %self.settings.worker_id, "Task claimed");
        let timer = Instant::now();

        let executed = match self.execute(&task).await {
            Ok(written) => self
                .store
                .complete_task(task.task_id, task.attempt)
                .await
                .map(|current| (current, written))
                .map_err(TaskError::from),
            Err(err) => Err(err),
        };

        let outcome = match executed {
            Ok((true, written)) => {
                self.stats.succeeded += 1;
                info!(
                    results = written,
                    elapsed_ms = timer.elapsed().as_millis() as u64,
                    "Task succeeded"
                );
                PollOutcome::Succeeded(task.task_id)
            }
            Ok((false, _)) => {
                self.stats.lost_leases += 1;
                warn!("Lease lost before completion; results kept, status untouched");
                PollOutcome::LostLease(task.task_id)
            }
            Err(err) => self.record_failure(&task, err).await?,
        };

        if let Err(e) = self.store.refresh_run_status(&task.run_id).await {
            warn!(error = %e, "Failed to refresh run status");
        }
        Ok(outcome)
    }

    async fn record_failure(
        &mut self,
        task: &TaskRecord,
        err: TaskError,
    ) -> Result<PollOutcome, StoreError> {
        let action = self.retry.decide(task, &err);
        let message = truncate_error(&err.to_string(), self.settings.max_error_len);

        let status = self
            .store
            .fail_task(task.task_id, task.attempt, &message, action)
            .await?;

        Ok(match status {
            Some(TaskStatus::Dead) => {
                self.stats.dead += 1;
                error!(
                    kind = %err.kind(),
                    error = %message,
                    max_attempts = task.max_attempts,
                    "Task dead-lettered"
                );
                PollOutcome::Dead(task.task_id)
            }
            Some(status) => {
                self.stats.requeued += 1;
                let delay_ms = match action {
                    FailAction::Requeue { delay } => delay.as_millis() as u64,
                    FailAction::DeadLetter => 0,
                };
                warn!(
                    kind = %err.kind(),
                    error = %message,
                    %status,
                    delay_ms,
                    "Task failed; requeued"
                );
                PollOutcome::Requeued(task.task_id)
            }
            None => {
                self.stats.lost_leases += 1;
                warn!(error = %message, "Lease lost before failure could be recorded");
                PollOutcome::LostLease(task.task_id)
            }
        })
    }

    /// Price every owned `(scenario, position)` pair and upsert the results.
    /// Returns the number of results written.
    async fn execute(&mut self, task: &TaskRecord) -> Result<usize, TaskError> {
        let run = self
            .store
            .get_run(&task.run_id)
            .await?
            .ok_or_else(|| TaskError::not_found("run", &task.run_id))?;
        let positions = self
            .store
            .get_position_snapshot(&task.position_snapshot_id)
            .await?
            .ok_or_else(|| TaskError::not_found("position snapshot", &task.position_snapshot_id))?;
        let market = self
            .store
            .get_market_snapshot(&run.market_snapshot_id)
            .await?
            .ok_or_else(|| TaskError::not_found("market snapshot", &run.market_snapshot_id))?;

        let shard = ShardKey::new(task.hash_mod, task.hash_bucket);
        let owned = positions
            .shard(&task.product_type, shard)
            .map(|position| {
                positions
                    .resolve_instrument(position)
                    .map(|instrument| (position, instrument))
                    .ok_or_else(|| {
                        TaskError::not_found(
                            "instrument",
                            position.instrument_id.as_deref().unwrap_or_default(),
                        )
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(positions = owned.len(), scenarios = run.scenarios.len(), "Executing");

        let mut written = 0;
        for scenario_id in &run.scenarios {
            for (position, instrument) in &owned {
                let started_at: DateTime<Utc> = Utc::now();
                let timer = Instant::now();
                let measures = self
                    .registry
                    .price(
                        &task.product_type,
                        position,
                        instrument,
                        &market,
                        &run.measures,
                        scenario_id,
                    )
                    .map_err(|source| TaskError::Computation {
                        position_id: position.position_id.clone(),
                        scenario_id: scenario_id.clone(),
                        source,
                    })?;

                let input_hash = content_hash(&HashInput {
                    run_id: &run.run_id,
                    position,
                    instrument,
                    market_snapshot_id: &run.market_snapshot_id,
                    scenario_id,
                })
                .map_err(StoreError::from)?;

                let now = Utc::now();
                let result = ValuationResult {
                    run_id: run.run_id.clone(),
                    position_id: position.position_id.clone(),
                    scenario_id: scenario_id.clone(),
                    instrument_id: Some(instrument.instrument_id.clone()),
                    portfolio_node_id: position
                        .portfolio_node_id
                        .clone()
                        .or_else(|| task.portfolio_node_id.clone()),
                    product_type: task.product_type.clone(),
                    base_ccy: position.base_ccy.clone(),
                    measures,
                    compute_meta: ComputeMeta {
                        engine_version: ENGINE_VERSION.to_string(),
                        worker_id: self.settings.worker_id.clone(),
                        task_id: task.task_id,
                        attempt: task.attempt,
                        started_at,
                        elapsed_micros: timer.elapsed().as_micros() as u64,
                    },
                    input_hash,
                    created_at: now,
                    updated_at: now,
                };
                self.store.upsert_result(&result).await?;
                written += 1;
                self.stats.results_written += 1;
            }
        }
        Ok(written)
    }

    /// Poll until nothing is claimable. Never sleeps.
    pub async fn run_until_idle(&mut self) -> Result<WorkerStats, StoreError> {
        while self.poll_once().await? != PollOutcome::Idle {}
        Ok(self.stats)
    }

    /// Poll until `shutdown` turns true or its sender is dropped. An
    /// in-flight task always runs to completion first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!(worker_id = %self.settings.worker_id, "Worker started");

        while !*shutdown.borrow() {
            let pause = match self.poll_once().await {
                Ok(PollOutcome::Idle) => self.settings.idle_sleep,
                Ok(PollOutcome::Requeued(_)) | Ok(PollOutcome::Dead(_)) => {
                    self.settings.failure_pause
                }
                Ok(_) => continue,
                Err(e) => {
                    error!(worker_id = %self.settings.worker_id, error = %e, "Poll failed");
                    self.settings.failure_pause
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(
            worker_id = %self.settings.worker_id,
            claimed = self.stats.claimed,
            succeeded = self.stats.succeeded,
            dead = self.stats.dead,
            "Worker stopped"
        );
        self.stats
    }
}
