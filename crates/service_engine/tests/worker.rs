//! Worker loop behaviour against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use infra_store::{InMemoryStore, ManualClock, RunStatus, Store, TaskStatus};
use pricer_core::shard::bucket;
use pricer_core::types::{Curve, PositionSnapshot};
use pricer_dispatch::{PricerRegistry, AMORT_LOAN, FX_FWD};
use service_engine::{
    task_id_for, PollOutcome, RetryPolicy, RunRequest, WorkerPool, WorkerSettings, ENGINE_VERSION,
};

use common::*;

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_two_product_types_one_shard_all_succeed() {
    let grid = Grid::new().await;
    let request = RunRequest::inline(
        "R-A",
        &grid.market_id,
        vec![fx_position("FX-1"), loan_position("LN-1"), loan_position("LN-2")],
    )
    .with_hash_mod(1);

    let created = grid.decomposer().create_run(&request).await.unwrap();
    assert_eq!(created.task_ids.len(), 2);

    let mut worker = grid.worker("w1");
    let stats = worker.run_until_idle().await.unwrap();
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.results_written, 3);

    let progress = grid.store.run_progress("R-A").await.unwrap();
    assert_eq!(progress.queued, 0);
    assert_eq!(progress.running, 0);
    assert_eq!(progress.succeeded, 2);

    let run = grid.store.get_run("R-A").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);

    for task in grid.store.list_tasks("R-A").await.unwrap() {
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempt, 1);
        assert!(task.leased_until.is_none());
        assert!(task.last_error.is_none());
    }
}

#[tokio::test]
async fn test_result_row_carries_provenance() {
    let grid = Grid::new().await;
    let request = RunRequest::inline("R-META", &grid.market_id, vec![fx_position("FX-1")])
        .with_measures(&["PV", "FWD_RATE"]);
    grid.decomposer().create_run(&request).await.unwrap();

    grid.worker("w-meta").run_until_idle().await.unwrap();

    let result = grid
        .store
        .get_result("R-META", "FX-1", "BASE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.product_type, FX_FWD);
    assert_eq!(result.base_ccy.as_deref(), Some("USD"));
    assert_eq!(result.portfolio_node_id.as_deref(), Some("BOOK-FX"));
    assert_eq!(result.instrument_id.as_deref(), Some("FX-1"));
    assert_eq!(result.input_hash.len(), 64);
    assert_eq!(
        result.measures.keys().collect::<Vec<_>>(),
        vec!["FWD_RATE", "PV"]
    );
    assert_eq!(result.compute_meta.engine_version, ENGINE_VERSION);
    assert_eq!(result.compute_meta.worker_id, "w-meta");
    assert_eq!(result.compute_meta.attempt, 1);
    assert_eq!(
        result.compute_meta.task_id,
        task_id_for("R-META", FX_FWD, 0)
    );
}

#[tokio::test]
async fn test_every_scenario_is_priced() {
    let grid = Grid::new().await;
    let request = RunRequest::inline("R-SCN", &grid.market_id, vec![loan_position("LN-1")])
        .with_scenarios(&["BASE", RATES_UP]);
    grid.decomposer().create_run(&request).await.unwrap();

    grid.worker("w1").run_until_idle().await.unwrap();

    let results = grid.store.list_results("R-SCN").await.unwrap();
    assert_eq!(results.len(), 2);

    let pv = |scenario: &str| {
        results
            .iter()
            .find(|r| r.scenario_id == scenario)
            .map(|r| r.measures["PV"])
            .unwrap()
    };
    assert!(pv(RATES_UP) < pv("BASE"));

    let hashes: Vec<_> = results.iter().map(|r| r.input_hash.as_str()).collect();
    assert_ne!(hashes[0], hashes[1]);
}

#[tokio::test]
async fn test_idle_when_nothing_claimable() {
    let grid = Grid::new().await;
    let mut worker = grid.worker("w1");
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Idle);
    assert_eq!(worker.stats().claimed, 0);
}

// ============================================================================
// Sharding
// ============================================================================

#[tokio::test]
async fn test_only_owning_bucket_prices_a_position() {
    let pricer = RecordingPricer::default();
    let grid = Grid::with_registry(PricerRegistry::new().with_pricer(pricer.clone())).await;

    let target = id_in_bucket("FX", 4, 2);
    let mut positions = vec![fx_position(&target)];
    for b in [0, 1, 3] {
        positions.push(fx_position(&id_in_bucket("OTHER", 4, b)));
    }
    let request = RunRequest::inline("R-C", &grid.market_id, positions).with_hash_mod(4);
    let created = grid.decomposer().create_run(&request).await.unwrap();
    assert_eq!(created.task_ids.len(), 4);

    grid.worker("w1").run_until_idle().await.unwrap();

    assert_eq!(pricer.calls_for(&target), 1);
    let result = grid
        .store
        .get_result("R-C", &target, "BASE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.compute_meta.task_id, task_id_for("R-C", FX_FWD, 2));

    for result in grid.store.list_results("R-C").await.unwrap() {
        let owner = task_id_for("R-C", FX_FWD, bucket(&result.position_id, 4));
        assert_eq!(result.compute_meta.task_id, owner);
    }
    assert_eq!(grid.store.result_count().unwrap(), 4);
}

#[tokio::test]
async fn test_empty_bucket_succeeds_without_results() {
    let grid = Grid::new().await;
    let request = RunRequest::inline("R-SPARSE", &grid.market_id, vec![fx_position("FX-1")])
        .with_hash_mod(3);
    grid.decomposer().create_run(&request).await.unwrap();

    let stats = grid.worker("w1").run_until_idle().await.unwrap();
    assert_eq!(stats.succeeded, 3);
    assert_eq!(stats.results_written, 1);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_always_failing_pricer_is_dead_lettered_after_budget() {
    let grid = Grid::with_registry(PricerRegistry::new().with_pricer(FailingPricer)).await;
    let request = RunRequest::inline("R-B", &grid.market_id, vec![fx_position("FX-1")])
        .with_max_attempts(3);
    let created = grid.decomposer().create_run(&request).await.unwrap();
    let task_id = created.task_ids[0];

    let mut worker = grid.worker("w1");
    assert_eq!(
        worker.poll_once().await.unwrap(),
        PollOutcome::Requeued(task_id)
    );
    let requeued = grid.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert!(requeued.leased_until.is_none());

    assert_eq!(
        worker.poll_once().await.unwrap(),
        PollOutcome::Requeued(task_id)
    );
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Dead(task_id));
    assert_eq!(worker.poll_once().await.unwrap(), PollOutcome::Idle);

    let task = grid.store.get_task(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Dead);
    assert_eq!(task.attempt, 3);
    let error = task.last_error.unwrap();
    assert!(error.contains("FX-1"), "{}", error);
    assert!(error.contains("Missing curve: XAU"), "{}", error);

    let stats = worker.stats();
    assert_eq!((stats.claimed, stats.requeued, stats.dead), (3, 2, 1));

    let run = grid.store.get_run("R-B").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::CompletedWithErrors);
    assert_eq!(grid.store.result_count().unwrap(), 0);
}

#[tokio::test]
async fn test_failure_aborts_whole_batch() {
    let grid = Grid::with_registry(
        PricerRegistry::with_defaults().with_pricer(FailingPricer),
    )
    .await;
    let request = RunRequest::inline(
        "R-ABORT",
        &grid.market_id,
        vec![fx_position("FX-1"), loan_position("LN-1")],
    )
    .with_max_attempts(1);
    grid.decomposer().create_run(&request).await.unwrap();

    grid.worker("w1").run_until_idle().await.unwrap();

    let progress = grid.store.run_progress("R-ABORT").await.unwrap();
    assert_eq!((progress.succeeded, progress.dead), (1, 1));
    let results = grid.store.list_results("R-ABORT").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].product_type, AMORT_LOAN);
}

#[tokio::test]
async fn test_error_text_is_truncated() {
    let grid = Grid::with_registry(PricerRegistry::new().with_pricer(FailingPricer)).await;
    let request = RunRequest::inline("R-TRUNC", &grid.market_id, vec![fx_position("FX-1")])
        .with_max_attempts(1);
    let created = grid.decomposer().create_run(&request).await.unwrap();

    let settings = WorkerSettings {
        max_error_len: 12,
        ..WorkerSettings::new("w1")
    };
    let mut worker = service_engine::Worker::new(grid.dyn_store(), grid.registry.clone(), settings);
    worker.run_until_idle().await.unwrap();

    let task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.last_error.unwrap().chars().count(), 12);
}

#[tokio::test]
async fn test_missing_market_snapshot_uses_uniform_retry() {
    let grid = Grid::new().await;
    let request = RunRequest::inline("R-NF", "no-such-market", vec![fx_position("FX-1")]);
    let created = grid.decomposer().create_run(&request).await.unwrap();

    let stats = grid.worker("w1").run_until_idle().await.unwrap();
    assert_eq!(stats.claimed, 3);

    let task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Dead);
    assert_eq!(task.attempt, 3);
    assert_eq!(
        task.last_error.as_deref(),
        Some("market snapshot no-such-market not found")
    );
}

#[tokio::test]
async fn test_malformed_stored_curve_fails_the_task() {
    let grid = Grid::new().await;
    let mut broken = market();
    broken.curves.insert(
        "USD".to_string(),
        Curve {
            tenors: vec![1.0, 2.0, 5.0],
            zero_rates: vec![0.04],
        },
    );
    // Written straight to the store, bypassing ingestion validation.
    grid.store.put_market_snapshot("mkt-broken", &broken).await.unwrap();

    let request = RunRequest::inline("R-CURVE", "mkt-broken", vec![loan_position("LN-1")])
        .with_max_attempts(1);
    let created = grid.decomposer().create_run(&request).await.unwrap();

    let mut worker = grid.worker("w1");
    assert_eq!(
        worker.poll_once().await.unwrap(),
        PollOutcome::Dead(created.task_ids[0])
    );
    let task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    let error = task.last_error.unwrap();
    assert!(error.contains("Invalid market data"), "{}", error);
}

#[tokio::test]
async fn test_missing_reference_dead_letters_immediately_when_opted_in() {
    let grid = Grid::new().await;
    let request = RunRequest::inline("R-NF2", "no-such-market", vec![fx_position("FX-1")]);
    let created = grid.decomposer().create_run(&request).await.unwrap();

    let policy = RetryPolicy {
        dead_letter_non_retryable: true,
        ..RetryPolicy::default()
    };
    let mut worker = grid.worker("w1").with_retry_policy(policy);
    assert_eq!(
        worker.poll_once().await.unwrap(),
        PollOutcome::Dead(created.task_ids[0])
    );

    let task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.attempt, 1);
    assert_eq!(task.status, TaskStatus::Dead);
}

#[tokio::test]
async fn test_unresolvable_instrument_is_not_found() {
    let grid = Grid::new().await;
    let orphan = pricer_core::Position::new("FX-ORPHAN", FX_FWD, Default::default())
        .with_instrument_id("INST-404");
    let request = RunRequest::inline("R-INST", &grid.market_id, vec![orphan]).with_max_attempts(1);
    let created = service_engine::RunDecomposer::new(grid.dyn_store(), Default::default())
        .create_run(&request)
        .await
        .unwrap();

    grid.worker("w1").run_until_idle().await.unwrap();

    let task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Dead);
    assert_eq!(task.last_error.as_deref(), Some("instrument INST-404 not found"));
}

#[tokio::test]
async fn test_instrument_map_overrides_inline_terms() {
    let grid = Grid::new().await;
    let mut instrument = pricer_core::Instrument::inline(&fx_position("FX-SHARED"));
    instrument.instrument_id = "FXF-MASTER".to_string();

    let position = pricer_core::Position::new("FX-1", FX_FWD, Default::default())
        .with_instrument_id("FXF-MASTER");
    let snapshot = PositionSnapshot::new(vec![position]).with_instrument(instrument);
    let snapshot_id = service_engine::ingest_position_snapshot(
        grid.store.as_ref(),
        Some(grid.registry.as_ref()),
        &snapshot,
    )
    .await
    .unwrap();

    let mut request = RunRequest::inline("R-MAP", &grid.market_id, Vec::new());
    request.positions = None;
    request.position_snapshot_id = Some(snapshot_id);
    grid.decomposer().create_run(&request).await.unwrap();

    let stats = grid.worker("w1").run_until_idle().await.unwrap();
    assert_eq!(stats.succeeded, 1);

    let result = grid
        .store
        .get_result("R-MAP", "FX-1", "BASE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.instrument_id.as_deref(), Some("FXF-MASTER"));
}

// ============================================================================
// Leases and convergence
// ============================================================================

#[tokio::test]
async fn test_crashed_claim_is_recovered_after_lease_expiry() {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let grid = Grid::with_store(
        InMemoryStore::with_clock(clock.clone()),
        PricerRegistry::with_defaults(),
    )
    .await;
    let request = RunRequest::inline("R-D", &grid.market_id, vec![fx_position("FX-1")]);
    let created = grid.decomposer().create_run(&request).await.unwrap();
    clock.advance(chrono::Duration::seconds(1));

    // The first worker claims and then disappears.
    let lease = Duration::from_secs(60);
    let crashed = grid.store.claim_next("w-crashed", lease).await.unwrap().unwrap();
    assert_eq!(crashed.attempt, 1);

    let mut survivor = grid.worker("w-survivor");
    assert_eq!(survivor.poll_once().await.unwrap(), PollOutcome::Idle);

    clock.advance(chrono::Duration::seconds(61));
    assert_eq!(
        survivor.poll_once().await.unwrap(),
        PollOutcome::Succeeded(created.task_ids[0])
    );

    let task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    assert_eq!(task.attempt, crashed.attempt + 1);
    assert_eq!(task.status, TaskStatus::Succeeded);

    // The stale claim can no longer finalize the task.
    assert!(!grid
        .store
        .complete_task(crashed.task_id, crashed.attempt)
        .await
        .unwrap());

    let result = grid
        .store
        .get_result("R-D", "FX-1", "BASE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.compute_meta.worker_id, "w-survivor");
    assert_eq!(result.compute_meta.attempt, 2);
}

#[tokio::test]
async fn test_re_execution_converges_to_one_row() {
    let grid = Grid::new().await;
    let request = RunRequest::inline(
        "R-CONV",
        &grid.market_id,
        vec![fx_position("FX-1"), fx_position("FX-2")],
    );
    let created = grid.decomposer().create_run(&request).await.unwrap();

    grid.worker("w1").run_until_idle().await.unwrap();
    let first = grid
        .store
        .get_result("R-CONV", "FX-1", "BASE")
        .await
        .unwrap()
        .unwrap();

    // Put the finished task back in the queue, as if its completion had been lost.
    let mut task = grid.store.get_task(created.task_ids[0]).await.unwrap().unwrap();
    task.status = TaskStatus::Queued;
    grid.store.put_task(task).unwrap();

    grid.worker("w2").run_until_idle().await.unwrap();
    let second = grid
        .store
        .get_result("R-CONV", "FX-1", "BASE")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(grid.store.result_count().unwrap(), 2);
    assert_eq!(second.measures, first.measures);
    assert_eq!(second.input_hash, first.input_hash);
    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.compute_meta.worker_id, "w2");
    assert_eq!(second.compute_meta.attempt, 2);
}

// ============================================================================
// Pool
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_drains_run_with_concurrent_workers() {
    let grid = Grid::new().await;
    let mut positions = Vec::new();
    for i in 0..20 {
        positions.push(fx_position(&format!("FX-{}", i)));
        positions.push(loan_position(&format!("LN-{}", i)));
    }
    let request = RunRequest::inline("R-POOL", &grid.market_id, positions).with_hash_mod(8);
    let created = grid.decomposer().create_run(&request).await.unwrap();
    assert_eq!(created.task_ids.len(), 16);

    let settings = WorkerSettings::new("pool").with_idle_sleep(Duration::from_millis(5));
    let pool = WorkerPool::spawn(
        grid.dyn_store(),
        grid.registry.clone(),
        settings,
        RetryPolicy::default(),
        4,
    );
    assert_eq!(pool.worker_ids(), vec!["pool-0", "pool-1", "pool-2", "pool-3"]);

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let run = grid.store.get_run("R-POOL").await.unwrap().unwrap();
            if run.status.is_finished() {
                break run.status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(finished, RunStatus::Succeeded);

    let stats = pool.shutdown_and_join().await;
    assert_eq!(stats.claimed, 16);
    assert_eq!(stats.succeeded, 16);
    assert_eq!(stats.results_written, 40);
    assert_eq!(grid.store.result_count().unwrap(), 40);
}

#[tokio::test]
async fn test_pool_shuts_down_when_idle() {
    let grid = Grid::new().await;
    let settings = WorkerSettings::new("idle").with_idle_sleep(Duration::from_secs(30));
    let pool = WorkerPool::spawn(
        grid.dyn_store(),
        grid.registry.clone(),
        settings,
        RetryPolicy::default(),
        2,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stats = tokio::time::timeout(Duration::from_secs(5), pool.shutdown_and_join())
        .await
        .unwrap();
    assert_eq!(stats.claimed, 0);
}
