//! Behaviour every `Store` implementation must share.
//!
//! Each check assumes it runs against an empty store.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use infra_store::{
    ComputeMeta, FailAction, RunRecord, RunStatus, Store, TaskRecord, TaskStatus,
    ValuationResult,
};
use pricer_core::types::{Attributes, Measures, Position, PositionSnapshot};
use uuid::Uuid;

pub const LONG_LEASE: Duration = Duration::from_secs(60);

// ============================================================================
// Fixtures
// ============================================================================

pub fn snapshot() -> PositionSnapshot {
    PositionSnapshot::new(vec![
        Position::new("P1", "FX_FWD", Attributes::new()),
        Position::new("P2", "AMORT_LOAN", Attributes::new()),
    ])
}

pub fn run_record(run_id: &str, now: DateTime<Utc>) -> RunRecord {
    RunRecord {
        run_id: run_id.to_string(),
        run_type: "EOD".to_string(),
        as_of_time: now,
        market_snapshot_id: "mkt".to_string(),
        position_snapshot_id: format!("pos-{}", run_id),
        measures: vec!["PV".to_string()],
        scenarios: vec!["BASE".to_string()],
        portfolio_scope: vec!["BOOK-1".to_string()],
        hash_mod: 2,
        max_attempts: 3,
        status: RunStatus::Queued,
        requested_by: Some("tests".to_string()),
        created_at: now,
        updated_at: now,
    }
}

/// Tasks for `run` over the given product types, `run.hash_mod` buckets each.
pub fn tasks_for(run: &RunRecord, product_types: &[&str], now: DateTime<Utc>) -> Vec<TaskRecord> {
    product_types
        .iter()
        .flat_map(|pt| {
            (0..run.hash_mod).map(move |b| {
                TaskRecord::queued(
                    Uuid::new_v4(),
                    &run.run_id,
                    None,
                    pt,
                    &run.position_snapshot_id,
                    run.hash_mod,
                    b,
                    run.max_attempts,
                    now,
                )
            })
        })
        .collect()
}

/// Create a run with FX_FWD and AMORT_LOAN tasks and return the tasks.
pub async fn seed_run<S: Store + ?Sized>(store: &S, run_id: &str) -> Vec<TaskRecord> {
    let now = Utc::now();
    let run = run_record(run_id, now);
    let tasks = tasks_for(&run, &["FX_FWD", "AMORT_LOAN"], now);
    store
        .create_run(&run, Some(&snapshot()), &tasks)
        .await
        .unwrap();
    tasks
}

pub fn result(run_id: &str, position_id: &str, pv: f64) -> ValuationResult {
    let now = Utc::now();
    let mut measures = Measures::new();
    measures.insert("PV".to_string(), pv);
    ValuationResult {
        run_id: run_id.to_string(),
        position_id: position_id.to_string(),
        scenario_id: "BASE".to_string(),
        instrument_id: Some(position_id.to_string()),
        portfolio_node_id: Some("BOOK-1".to_string()),
        product_type: "FX_FWD".to_string(),
        base_ccy: Some("USD".to_string()),
        measures,
        compute_meta: ComputeMeta {
            engine_version: "test".to_string(),
            worker_id: "w1".to_string(),
            task_id: Uuid::nil(),
            attempt: 1,
            started_at: now,
            elapsed_micros: 5,
        },
        input_hash: "ab".repeat(32),
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// Checks
// ============================================================================

pub async fn check_create_run_is_idempotent<S: Store + ?Sized>(store: &S) {
    let now = Utc::now();
    let run = run_record("R-IDEM", now);
    let tasks = tasks_for(&run, &["FX_FWD"], now);

    let first = store
        .create_run(&run, Some(&snapshot()), &tasks)
        .await
        .unwrap();
    assert!(first.run_inserted);
    assert!(first.snapshot_inserted);
    assert_eq!(first.tasks_inserted, 2);

    let again = store
        .create_run(&run, Some(&snapshot()), &tasks)
        .await
        .unwrap();
    assert!(!again.run_inserted);
    assert!(!again.snapshot_inserted);
    assert_eq!(again.tasks_inserted, 0);

    assert_eq!(store.list_tasks("R-IDEM").await.unwrap().len(), 2);
    let stored = store.get_run("R-IDEM").await.unwrap().unwrap();
    assert_eq!(stored.measures, run.measures);
    assert!(store
        .get_position_snapshot(&run.position_snapshot_id)
        .await
        .unwrap()
        .is_some());
}

pub async fn check_claim_order_and_attempts<S: Store + ?Sized>(store: &S) {
    seed_run(store, "R-ORDER").await;

    let mut seen = Vec::new();
    while let Some(task) = store.claim_next("w1", LONG_LEASE).await.unwrap() {
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.attempt, 1);
        assert!(task.leased_until.is_some());
        assert_eq!(task.leased_by.as_deref(), Some("w1"));
        seen.push((task.product_type.clone(), task.hash_bucket));
    }
    assert_eq!(
        seen,
        vec![
            ("AMORT_LOAN".to_string(), 0),
            ("AMORT_LOAN".to_string(), 1),
            ("FX_FWD".to_string(), 0),
            ("FX_FWD".to_string(), 1),
        ]
    );
}

pub async fn check_complete_is_fenced<S: Store + ?Sized>(store: &S) {
    seed_run(store, "R-FENCE").await;
    let task = store.claim_next("w1", LONG_LEASE).await.unwrap().unwrap();

    assert!(!store.complete_task(task.task_id, task.attempt + 1).await.unwrap());
    assert!(store.complete_task(task.task_id, task.attempt).await.unwrap());
    assert!(!store.complete_task(task.task_id, task.attempt).await.unwrap());

    let done = store.get_task(task.task_id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Succeeded);
    assert!(done.leased_until.is_none());
    assert!(done.last_error.is_none());
}

pub async fn check_fail_requeues_then_dead_letters<S: Store + ?Sized>(store: &S) {
    seed_run(store, "R-FAIL").await;
    let task = store.claim_next("w1", LONG_LEASE).await.unwrap().unwrap();

    let status = store
        .fail_task(
            task.task_id,
            task.attempt,
            "boom",
            FailAction::Requeue {
                delay: Duration::ZERO,
            },
        )
        .await
        .unwrap();
    assert_eq!(status, Some(TaskStatus::Queued));
    let requeued = store.get_task(task.task_id).await.unwrap().unwrap();
    assert_eq!(requeued.last_error.as_deref(), Some("boom"));
    assert!(requeued.leased_until.is_none());

    // Stale attempt is ignored.
    assert_eq!(
        store
            .fail_task(task.task_id, task.attempt, "late", FailAction::DeadLetter)
            .await
            .unwrap(),
        None
    );

    let again = store.claim_next("w2", LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(again.task_id, task.task_id);
    assert_eq!(again.attempt, 2);

    let status = store
        .fail_task(again.task_id, again.attempt, "still boom", FailAction::DeadLetter)
        .await
        .unwrap();
    assert_eq!(status, Some(TaskStatus::Dead));

    let dead = store.get_task(task.task_id).await.unwrap().unwrap();
    assert_eq!(dead.status, TaskStatus::Dead);
    assert_eq!(dead.attempt, 2);

    // Dead tasks are never claimed again.
    while let Some(t) = store.claim_next("w3", LONG_LEASE).await.unwrap() {
        assert_ne!(t.task_id, task.task_id);
    }
}

pub async fn check_backoff_delays_claim<S: Store + ?Sized>(store: &S) {
    let now = Utc::now();
    let run = run_record("R-BACKOFF", now);
    let tasks = tasks_for(&run, &["FX_FWD"], now)
        .into_iter()
        .take(1)
        .collect::<Vec<_>>();
    store
        .create_run(&run, Some(&snapshot()), &tasks)
        .await
        .unwrap();

    let task = store.claim_next("w1", LONG_LEASE).await.unwrap().unwrap();
    store
        .fail_task(
            task.task_id,
            task.attempt,
            "transient",
            FailAction::Requeue {
                delay: Duration::from_secs(3600),
            },
        )
        .await
        .unwrap();
    assert!(store.claim_next("w1", LONG_LEASE).await.unwrap().is_none());
}

pub async fn check_expired_lease_is_reclaimed<S: Store + ?Sized>(store: &S) {
    let now = Utc::now();
    let run = run_record("R-LEASE", now);
    let tasks = tasks_for(&run, &["FX_FWD"], now)
        .into_iter()
        .take(1)
        .collect::<Vec<_>>();
    store
        .create_run(&run, Some(&snapshot()), &tasks)
        .await
        .unwrap();

    let first = store
        .claim_next("crashed", Duration::from_millis(200))
        .await
        .unwrap()
        .unwrap();
    assert!(store.claim_next("w2", LONG_LEASE).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let second = store.claim_next("w2", LONG_LEASE).await.unwrap().unwrap();
    assert_eq!(second.task_id, first.task_id);
    assert_eq!(second.attempt, first.attempt + 1);
    assert_eq!(second.leased_by.as_deref(), Some("w2"));

    // The crashed worker's claim is stale now.
    assert!(!store.complete_task(first.task_id, first.attempt).await.unwrap());
}

pub async fn check_concurrent_claims_are_exclusive<S: Store + 'static>(store: Arc<S>) {
    let now = Utc::now();
    let mut run = run_record("R-RACE", now);
    run.hash_mod = 16;
    let tasks = tasks_for(&run, &["FX_FWD", "AMORT_LOAN", "SWAP"], now);
    store
        .create_run(&run, Some(&snapshot()), &tasks)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for w in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let worker = format!("w{}", w);
            let mut mine = Vec::new();
            while let Some(task) = store.claim_next(&worker, LONG_LEASE).await.unwrap() {
                mine.push(task.task_id);
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), tasks.len());
    assert_eq!(unique.len(), tasks.len());
}

pub async fn check_result_upsert_converges<S: Store + ?Sized>(store: &S) {
    seed_run(store, "R-RES").await;

    store.upsert_result(&result("R-RES", "P1", 1.0)).await.unwrap();
    let first = store
        .get_result("R-RES", "P1", "BASE")
        .await
        .unwrap()
        .unwrap();

    store.upsert_result(&result("R-RES", "P1", 2.0)).await.unwrap();
    store.upsert_result(&result("R-RES", "P2", 3.0)).await.unwrap();

    let rows = store.list_results("R-RES").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].position_id, "P1");
    assert_eq!(rows[0].measures["PV"], 2.0);
    assert_eq!(rows[0].created_at, first.created_at);
    assert!(rows[0].updated_at >= first.updated_at);
}

pub async fn check_run_status_refresh<S: Store + ?Sized>(store: &S) {
    let tasks = seed_run(store, "R-STATUS").await;
    assert_eq!(
        store.refresh_run_status("R-STATUS").await.unwrap(),
        RunStatus::Queued
    );

    for i in 0..tasks.len() {
        let task = store.claim_next("w1", LONG_LEASE).await.unwrap().unwrap();
        if i == 0 {
            assert_eq!(
                store.refresh_run_status("R-STATUS").await.unwrap(),
                RunStatus::Running
            );
            store
                .fail_task(task.task_id, task.attempt, "bad", FailAction::DeadLetter)
                .await
                .unwrap();
        } else {
            store.complete_task(task.task_id, task.attempt).await.unwrap();
        }
    }

    let progress = store.run_progress("R-STATUS").await.unwrap();
    assert_eq!(progress.dead, 1);
    assert_eq!(progress.succeeded, 3);
    assert_eq!(
        store.refresh_run_status("R-STATUS").await.unwrap(),
        RunStatus::CompletedWithErrors
    );
    assert_eq!(
        store.get_run("R-STATUS").await.unwrap().unwrap().status,
        RunStatus::CompletedWithErrors
    );
}

/// Workers finishing the last tasks of many runs at once must leave every
/// stored run status equal to the status derived from its tasks.
pub async fn check_concurrent_refresh_settles<S: Store + 'static>(store: Arc<S>) {
    let now = Utc::now();
    let mut run_ids = Vec::new();
    for r in 0..50 {
        let mut run = run_record(&format!("R-SETTLE-{}", r), now);
        run.hash_mod = 4;
        let tasks = tasks_for(&run, &["FX_FWD"], now);
        store
            .create_run(&run, Some(&snapshot()), &tasks)
            .await
            .unwrap();
        run_ids.push(run.run_id);
    }

    let mut claimed = Vec::new();
    while let Some(task) = store.claim_next("w1", LONG_LEASE).await.unwrap() {
        claimed.push(task);
    }
    assert_eq!(claimed.len(), 200);

    let mut handles = Vec::new();
    for task in claimed {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            assert!(store.complete_task(task.task_id, task.attempt).await.unwrap());
            store.refresh_run_status(&task.run_id).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    for run_id in &run_ids {
        let derived = store.run_progress(run_id).await.unwrap().status();
        assert_eq!(derived, RunStatus::Succeeded);
        let stored = store.get_run(run_id).await.unwrap().unwrap().status;
        assert_eq!(stored, derived, "{}", run_id);
    }
}
