//! Load commands
//!
//! Ingest market and position snapshots from JSON files. Each prints the
//! snapshot's content id, which run requests then reference.

use std::path::Path;

use infra_config::GridConfig;
use pricer_core::types::{MarketSnapshot, PositionSnapshot};
use pricer_dispatch::PricerRegistry;
use service_engine::{ingest_market_snapshot, ingest_position_snapshot};
use tracing::info;

use super::{connect, read_json};
use crate::Result;

/// Run the load-market command
pub async fn market(config: &GridConfig, path: &Path) -> Result<()> {
    let snapshot: MarketSnapshot = read_json(path)?;
    let store = connect(config).await?;

    let id = ingest_market_snapshot(store.as_ref(), &snapshot).await?;
    info!(
        snapshot_id = %id,
        curves = snapshot.curves.len(),
        fx_spots = snapshot.fx_spots.len(),
        scenarios = snapshot.scenarios.len(),
        "Market snapshot loaded"
    );
    println!("{}", id);
    Ok(())
}

/// Run the load-positions command
pub async fn positions(config: &GridConfig, path: &Path) -> Result<()> {
    let snapshot: PositionSnapshot = read_json(path)?;
    let store = connect(config).await?;
    let registry = PricerRegistry::with_defaults();

    let id = ingest_position_snapshot(store.as_ref(), Some(&registry), &snapshot).await?;
    info!(
        snapshot_id = %id,
        positions = snapshot.positions.len(),
        "Position snapshot loaded"
    );
    println!("{}", id);
    Ok(())
}
