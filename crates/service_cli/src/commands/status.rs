//! Status command implementation
//!
//! Shows a run's aggregate status, task counts and dead-lettered tasks.

use infra_config::GridConfig;
use infra_store::{RunProgress, RunRecord, Store, TaskRecord, TaskStatus};
use serde_json::json;

use super::connect;
use crate::{CliError, Result};

/// Run the status command
pub async fn run(config: &GridConfig, run_id: &str, format: &str) -> Result<()> {
    let store = connect(config).await?;
    let run = store
        .get_run(run_id)
        .await?
        .ok_or_else(|| CliError::InvalidArgument(format!("Unknown run: {}", run_id)))?;
    let status = store.refresh_run_status(run_id).await?;
    let progress = store.run_progress(run_id).await?;
    let dead: Vec<TaskRecord> = store
        .list_tasks(run_id)
        .await?
        .into_iter()
        .filter(|t| t.status == TaskStatus::Dead)
        .collect();

    match format {
        "json" => println!("{:#}", render_json(&run, status, &progress, &dead)),
        "table" => print!("{}", render_table(&run, status, &progress, &dead)),
        other => {
            return Err(CliError::InvalidArgument(format!(
                "Unknown format: {}. Supported: json, table",
                other
            )));
        }
    }
    Ok(())
}

fn render_json(
    run: &RunRecord,
    status: infra_store::RunStatus,
    progress: &RunProgress,
    dead: &[TaskRecord],
) -> serde_json::Value {
    json!({
        "run_id": run.run_id,
        "status": status.as_str(),
        "market_snapshot_id": run.market_snapshot_id,
        "position_snapshot_id": run.position_snapshot_id,
        "tasks": {
            "queued": progress.queued,
            "running": progress.running,
            "succeeded": progress.succeeded,
            "failed": progress.failed,
            "dead": progress.dead,
            "total": progress.total(),
        },
        "dead_tasks": dead.iter().map(|t| json!({
            "task_id": t.task_id,
            "product_type": t.product_type,
            "hash_bucket": t.hash_bucket,
            "attempt": t.attempt,
            "last_error": t.last_error,
        })).collect::<Vec<_>>(),
    })
}

fn render_table(
    run: &RunRecord,
    status: infra_store::RunStatus,
    progress: &RunProgress,
    dead: &[TaskRecord],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run {} ({}): {}\n", run.run_id, run.run_type, status));
    out.push_str(&format!("  as of    {}\n", run.as_of_time.to_rfc3339()));
    out.push_str(&format!("  market   {}\n", run.market_snapshot_id));
    out.push_str(&format!("  measures {}\n", run.measures.join(", ")));
    out.push_str(&format!("  scenarios {}\n", run.scenarios.join(", ")));
    out.push_str(&format!(
        "  tasks    {} queued, {} running, {} succeeded, {} dead ({} total)\n",
        progress.queued,
        progress.running,
        progress.succeeded,
        progress.dead,
        progress.total()
    ));
    for task in dead {
        out.push_str(&format!(
            "  DEAD {} {}#{} after {} attempts: {}\n",
            task.task_id,
            task.product_type,
            task.hash_bucket,
            task.attempt,
            task.last_error.as_deref().unwrap_or("-")
        ));
    }
    out
}
