//! Migrate command implementation
//!
//! Creates or upgrades the grid schema.

use infra_config::GridConfig;
use infra_store::Store;
use tracing::info;

use super::connect;
use crate::Result;

/// Run the migrate command
pub async fn run(config: &GridConfig) -> Result<()> {
    let store = connect(config).await?;
    store.migrate().await?;
    info!("Schema is up to date");
    Ok(())
}
