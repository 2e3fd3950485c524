//! Results command implementation
//!
//! Prints a run's valuation results as JSON.

use infra_config::GridConfig;
use infra_store::Store;

use super::connect;
use crate::Result;

/// Run the results command
pub async fn run(config: &GridConfig, run_id: &str, scenario: Option<&str>) -> Result<()> {
    let store = connect(config).await?;
    let results: Vec<_> = store
        .list_results(run_id)
        .await?
        .into_iter()
        .filter(|r| scenario.map_or(true, |s| r.scenario_id == s))
        .collect();
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
