//! Several independent worker loops in one process.
//!
//! Workers share the store handle and the pricer registry but nothing else;
//! they still coordinate only through claims.

use std::sync::Arc;

use infra_store::Store;
use pricer_dispatch::PricerRegistry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::retry::RetryPolicy;
use crate::worker::{Worker, WorkerSettings, WorkerStats};

/// Handle on a set of spawned workers.
pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<WorkerStats>)>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `workers` loops on the current runtime. With more than one
    /// worker, ids are `<worker_id>-<i>`.
    pub fn spawn(
        store: Arc<dyn Store>,
        registry: Arc<PricerRegistry>,
        settings: WorkerSettings,
        retry: RetryPolicy,
        workers: usize,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let workers = workers.max(1);

        let handles = (0..workers)
            .map(|i| {
                let mut settings = settings.clone();
                if workers > 1 {
                    settings.worker_id = format!("{}-{}", settings.worker_id, i);
                }
                let id = settings.worker_id.clone();
                let worker = Worker::new(Arc::clone(&store), Arc::clone(&registry), settings)
                    .with_retry_policy(retry);
                (id, tokio::spawn(worker.run(rx.clone())))
            })
            .collect();

        info!(workers, "Worker pool started");
        Self { handles, shutdown }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn worker_ids(&self) -> Vec<&str> {
        self.handles.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Ask every worker to stop after its current task.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for every worker to stop and sum their counters.
    pub async fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for (id, handle) in self.handles {
            match handle.await {
                Ok(stats) => total.merge(&stats),
                Err(e) => error!(worker_id = %id, error = %e, "Worker task panicked"),
            }
        }
        total
    }

    /// Signal shutdown, then join.
    pub async fn shutdown_and_join(self) -> WorkerStats {
        self.shutdown();
        self.join().await
    }
}
