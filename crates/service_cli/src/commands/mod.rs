//! CLI command implementations
//!
//! Each submodule implements one subcommand. Commands that touch the store
//! connect through [`connect`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use infra_config::GridConfig;
use infra_store::{PgStore, PgStoreOptions};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{CliError, Result};

pub mod load;
pub mod migrate;
pub mod results;
pub mod status;
pub mod submit;
pub mod work;

/// Open the Postgres pool described by `config`.
pub async fn connect(config: &GridConfig) -> Result<Arc<PgStore>> {
    let options = PgStoreOptions {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        acquire_timeout: Duration::from_secs(config.database.acquire_timeout_secs),
    };
    let store = PgStore::connect(&options).await?;
    debug!(max_connections = options.max_connections, "Connected to store");
    Ok(Arc::new(store))
}

/// Read and parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(CliError::FileNotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}
