//! Run request payload.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pricer_core::shard::MAX_HASH_MOD;
use pricer_core::types::{Instrument, Position, PositionSnapshot, ValidationError};
use serde::{Deserialize, Serialize};

/// A request to value a portfolio under a set of measures and scenarios.
///
/// Exactly one of `position_snapshot_id` and `positions` must be given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run_id: String,
    #[serde(default = "default_run_type")]
    pub run_type: String,
    pub as_of_time: DateTime<Utc>,
    pub market_snapshot_id: String,
    pub measures: Vec<String>,
    pub scenarios: Vec<String>,
    #[serde(default)]
    pub portfolio_scope: Vec<String>,
    /// Previously ingested position snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_snapshot_id: Option<String>,
    /// Inline positions, stored as a new snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<Vec<Position>>,
    /// Instruments referenced by inline positions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instruments: BTreeMap<String, Instrument>,
    /// Overrides the configured shard count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_mod: Option<u32>,
    /// Overrides the configured attempt budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

fn default_run_type() -> String {
    "EOD".to_string()
}

/// Where a run's positions come from.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionSource {
    Stored(String),
    Inline(PositionSnapshot),
}

impl RunRequest {
    /// Minimal request over inline positions.
    pub fn inline(
        run_id: impl Into<String>,
        market_snapshot_id: impl Into<String>,
        positions: Vec<Position>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            run_type: default_run_type(),
            as_of_time: Utc::now(),
            market_snapshot_id: market_snapshot_id.into(),
            measures: vec!["PV".to_string()],
            scenarios: vec!["BASE".to_string()],
            portfolio_scope: Vec::new(),
            position_snapshot_id: None,
            positions: Some(positions),
            instruments: BTreeMap::new(),
            hash_mod: None,
            max_attempts: None,
            requested_by: None,
        }
    }

    pub fn with_measures(mut self, measures: &[&str]) -> Self {
        self.measures = measures.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_scenarios(mut self, scenarios: &[&str]) -> Self {
        self.scenarios = scenarios.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_hash_mod(mut self, hash_mod: u32) -> Self {
        self.hash_mod = Some(hash_mod);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Request-level checks that need no store access.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.run_id.trim().is_empty() {
            return Err(ValidationError::invalid_field("run_id", "must not be empty"));
        }
        if self.market_snapshot_id.trim().is_empty() {
            return Err(ValidationError::invalid_field(
                "market_snapshot_id",
                "must not be empty",
            ));
        }
        if self.measures.is_empty() {
            return Err(ValidationError::NoMeasures);
        }
        if self.measures.iter().any(|m| m.trim().is_empty()) {
            return Err(ValidationError::invalid_field("measures", "blank measure name"));
        }
        if self.scenarios.is_empty() {
            return Err(ValidationError::NoScenarios);
        }
        if self.scenarios.iter().any(|s| s.trim().is_empty()) {
            return Err(ValidationError::invalid_field("scenarios", "blank scenario id"));
        }
        if let Some(hash_mod) = self.hash_mod {
            check_hash_mod(hash_mod)?;
        }
        if self.max_attempts == Some(0) {
            return Err(ValidationError::invalid_field(
                "max_attempts",
                "must be positive",
            ));
        }
        self.position_source().map(|_| ())
    }

    /// Resolve the position source.
    pub fn position_source(&self) -> Result<PositionSource, ValidationError> {
        match (&self.position_snapshot_id, &self.positions) {
            (Some(id), None) if !id.trim().is_empty() => Ok(PositionSource::Stored(id.clone())),
            (None, Some(positions)) => Ok(PositionSource::Inline(PositionSnapshot {
                positions: positions.clone(),
                instruments: self.instruments.clone(),
            })),
            _ => Err(ValidationError::AmbiguousPositionSource),
        }
    }
}

/// `hash_mod` must lie in `1..=MAX_HASH_MOD`.
pub(crate) fn check_hash_mod(hash_mod: u32) -> Result<(), ValidationError> {
    if hash_mod == 0 {
        return Err(ValidationError::invalid_field("hash_mod", "must be positive"));
    }
    if hash_mod > MAX_HASH_MOD {
        return Err(ValidationError::invalid_field(
            "hash_mod",
            format!("must be at most {}, got {}", MAX_HASH_MOD, hash_mod),
        ));
    }
    Ok(())
}
