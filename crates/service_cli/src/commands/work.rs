//! Work command implementation
//!
//! Runs worker loops against the store until Ctrl-C, or drains the queue
//! once with `--until-idle`.

use std::sync::Arc;

use infra_config::GridConfig;
use infra_store::Store;
use pricer_dispatch::PricerRegistry;
use service_engine::{RetryPolicy, Worker, WorkerPool, WorkerSettings, WorkerStats};
use tracing::info;

use super::connect;
use crate::Result;

/// Run the work command
pub async fn run(config: &GridConfig, workers: usize, until_idle: bool) -> Result<()> {
    let store: Arc<dyn Store> = connect(config).await?;
    let registry = Arc::new(PricerRegistry::with_defaults());
    let settings = WorkerSettings::from_config(&config.worker);
    let retry = RetryPolicy::from_config(&config.retry, &config.worker);

    info!(
        worker_id = %settings.worker_id,
        lease_secs = settings.lease.as_secs(),
        product_types = ?registry.product_types(),
        backoff = !retry.backoff_base.is_zero(),
        "Starting workers"
    );

    let stats = if until_idle {
        Worker::new(store, registry, settings)
            .with_retry_policy(retry)
            .run_until_idle()
            .await?
    } else {
        let pool = WorkerPool::spawn(store, registry, settings, retry, workers);
        info!(workers = pool.len(), "Press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested; finishing in-flight tasks");
        pool.shutdown_and_join().await
    };

    report(&stats);
    Ok(())
}

fn report(stats: &WorkerStats) {
    info!(
        claimed = stats.claimed,
        succeeded = stats.succeeded,
        requeued = stats.requeued,
        dead = stats.dead,
        lost_leases = stats.lost_leases,
        results = stats.results_written,
        "Workers finished"
    );
}
