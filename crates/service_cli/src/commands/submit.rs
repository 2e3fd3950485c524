//! Submit command implementation
//!
//! Creates a run from a JSON run request and prints its task ids.

use std::path::Path;
use std::sync::Arc;

use infra_config::GridConfig;
use pricer_core::types::Position;
use pricer_dispatch::PricerRegistry;
use serde_json::json;
use service_engine::{RunDecomposer, RunRequest};

use super::{connect, read_json};
use crate::{CliError, Result};

/// Run the submit command
///
/// `positions`, when given, is a JSON array of positions used in place of
/// whatever position source the request names.
pub async fn run(config: &GridConfig, request_path: &Path, positions: Option<&Path>) -> Result<()> {
    let mut request: RunRequest = read_json(request_path)?;
    if let Some(path) = positions {
        let inline: Vec<Position> = read_json(path)?;
        if inline.is_empty() {
            return Err(CliError::InvalidArgument(format!(
                "{} contains no positions",
                path.display()
            )));
        }
        request.position_snapshot_id = None;
        request.positions = Some(inline);
    }

    let store = connect(config).await?;
    let created = RunDecomposer::new(store, config.runs.clone())
        .with_registry(Arc::new(PricerRegistry::with_defaults()))
        .create_run(&request)
        .await?;

    let summary = json!({
        "run_id": created.run_id,
        "position_snapshot_id": created.position_snapshot_id,
        "run_inserted": created.run_inserted,
        "tasks_inserted": created.tasks_inserted,
        "task_ids": created.task_ids,
    });
    println!("{:#}", summary);
    Ok(())
}
