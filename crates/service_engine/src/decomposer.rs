//! Run decomposition.
//!
//! A run fans out into one task per `(product_type, bucket)`, where the
//! product types are those present in the position snapshot and the buckets
//! are `0..hash_mod`. Task ids are UUIDv5 of `run_id/product_type/bucket`, so
//! submitting the same run again inserts nothing new.

use std::sync::Arc;

use chrono::Utc;
use infra_config::RunConfig;
use infra_store::{RunRecord, RunStatus, Store, TaskRecord};
use pricer_core::shard::ShardKey;
use pricer_core::types::{MarketSnapshot, PositionSnapshot, ValidationError};
use pricer_dispatch::PricerRegistry;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::request::{check_hash_mod, PositionSource, RunRequest};

/// Namespace for deterministic task ids.
const TASK_NAMESPACE: Uuid = Uuid::from_u128(0x6e65_7574_7279_7867_7269_642d_7461_736b);

/// Deterministic id of the task owning `(product_type, bucket)` in `run_id`.
pub fn task_id_for(run_id: &str, product_type: &str, hash_bucket: u32) -> Uuid {
    let name = format!("{}/{}/{}", run_id, product_type, hash_bucket);
    Uuid::new_v5(&TASK_NAMESPACE, name.as_bytes())
}

/// Outcome of [`RunDecomposer::create_run`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRun {
    pub run_id: String,
    pub position_snapshot_id: String,
    /// Every task of the run, whether inserted now or earlier
    pub task_ids: Vec<Uuid>,
    /// False when the run already existed
    pub run_inserted: bool,
    pub tasks_inserted: usize,
}

/// Fans runs out into tasks.
pub struct RunDecomposer {
    store: Arc<dyn Store>,
    registry: Option<Arc<PricerRegistry>>,
    defaults: RunConfig,
}

impl RunDecomposer {
    pub fn new(store: Arc<dyn Store>, defaults: RunConfig) -> Self {
        Self {
            store,
            registry: None,
            defaults,
        }
    }

    /// Check positions against `registry` before accepting a run.
    pub fn with_registry(mut self, registry: Arc<PricerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate `request`, then write its snapshot, run row and tasks in one
    /// transaction.
    pub async fn create_run(&self, request: &RunRequest) -> Result<CreatedRun, EngineError> {
        request.validate()?;

        let (snapshot_id, snapshot, inline) = match request.position_source()? {
            PositionSource::Stored(id) => {
                let snapshot = self.store.get_position_snapshot(&id).await?.ok_or_else(|| {
                    ValidationError::UnknownSnapshot {
                        kind: "position",
                        id: id.clone(),
                    }
                })?;
                (id, snapshot, false)
            }
            PositionSource::Inline(snapshot) => (snapshot.content_id()?, snapshot, true),
        };

        snapshot.validate()?;
        if let Some(registry) = &self.registry {
            registry.validate_snapshot(&snapshot)?;
        }

        let hash_mod = request.hash_mod.unwrap_or(self.defaults.hash_mod);
        check_hash_mod(hash_mod)?;
        let max_attempts = request.max_attempts.unwrap_or(self.defaults.max_attempts);
        let now = Utc::now();
        let portfolio_node_id = match request.portfolio_scope.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        };

        let tasks: Vec<TaskRecord> = snapshot
            .product_types()
            .into_iter()
            .flat_map(|product_type| {
                ShardKey::all(hash_mod).map(move |shard| (product_type, shard))
            })
            .map(|(product_type, shard)| {
                TaskRecord::queued(
                    task_id_for(&request.run_id, product_type, shard.hash_bucket),
                    &request.run_id,
                    portfolio_node_id.clone(),
                    product_type,
                    &snapshot_id,
                    hash_mod,
                    shard.hash_bucket,
                    max_attempts,
                    now,
                )
            })
            .collect();

        let run = RunRecord {
            run_id: request.run_id.clone(),
            run_type: request.run_type.clone(),
            as_of_time: request.as_of_time,
            market_snapshot_id: request.market_snapshot_id.clone(),
            position_snapshot_id: snapshot_id.clone(),
            measures: request.measures.clone(),
            scenarios: request.scenarios.clone(),
            portfolio_scope: request.portfolio_scope.clone(),
            hash_mod,
            max_attempts,
            status: RunStatus::Queued,
            requested_by: request.requested_by.clone(),
            created_at: now,
            updated_at: now,
        };

        let outcome = self
            .store
            .create_run(&run, inline.then_some(&snapshot), &tasks)
            .await?;

        info!(
            run_id = %run.run_id,
            position_snapshot_id = %snapshot_id,
            positions = snapshot.positions.len(),
            hash_mod,
            tasks = tasks.len(),
            tasks_inserted = outcome.tasks_inserted,
            run_inserted = outcome.run_inserted,
            "Run decomposed"
        );

        Ok(CreatedRun {
            run_id: run.run_id,
            position_snapshot_id: snapshot_id,
            task_ids: tasks.iter().map(|t| t.task_id).collect(),
            run_inserted: outcome.run_inserted,
            tasks_inserted: outcome.tasks_inserted,
        })
    }
}

/// Validate and store a market snapshot, returning its content id.
pub async fn ingest_market_snapshot(
    store: &dyn Store,
    snapshot: &MarketSnapshot,
) -> Result<String, EngineError> {
    snapshot.validate()?;
    let id = snapshot.content_id()?;
    let inserted = store.put_market_snapshot(&id, snapshot).await?;
    debug!(snapshot_id = %id, inserted, "Market snapshot ingested");
    Ok(id)
}

/// Validate and store a position snapshot, returning its content id.
pub async fn ingest_position_snapshot(
    store: &dyn Store,
    registry: Option<&PricerRegistry>,
    snapshot: &PositionSnapshot,
) -> Result<String, EngineError> {
    snapshot.validate()?;
    if let Some(registry) = registry {
        registry.validate_snapshot(snapshot)?;
    }
    let id = snapshot.content_id()?;
    let inserted = store.put_position_snapshot(&id, snapshot).await?;
    debug!(snapshot_id = %id, inserted, "Position snapshot ingested");
    Ok(id)
}
