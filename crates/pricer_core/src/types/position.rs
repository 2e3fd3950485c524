//! Position and instrument payloads.
//!
//! A `PositionSnapshot` is an immutable, content-addressed list of positions.
//! The engine only inspects `position_id` and `product_type` for sharding;
//! `attributes` are opaque here and parsed into typed terms by the pricer
//! registered for the product type.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{ComputationError, ValidationError};
use crate::hashing::content_hash;
use crate::shard::ShardKey;

/// Free-form attribute map carried on positions and instruments.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// A single portfolio position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique id within the snapshot; the shard key
    #[serde(default)]
    pub position_id: String,
    /// Product type used for pricer dispatch (e.g. `FX_FWD`)
    #[serde(default)]
    pub product_type: String,
    /// Instrument reference, resolved against the snapshot's instrument map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_id: Option<String>,
    /// Owning portfolio node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_node_id: Option<String>,
    /// Reporting currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_ccy: Option<String>,
    /// Product-specific terms
    #[serde(default)]
    pub attributes: Attributes,
}

impl Position {
    /// Create a position with the given id, product type and terms.
    pub fn new(
        position_id: impl Into<String>,
        product_type: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            product_type: product_type.into(),
            instrument_id: None,
            portfolio_node_id: None,
            base_ccy: None,
            attributes,
        }
    }

    /// Set the owning portfolio node
    pub fn with_portfolio_node(mut self, node: impl Into<String>) -> Self {
        self.portfolio_node_id = Some(node.into());
        self
    }

    /// Set the instrument reference
    pub fn with_instrument_id(mut self, instrument_id: impl Into<String>) -> Self {
        self.instrument_id = Some(instrument_id.into());
        self
    }

    /// Set the reporting currency
    pub fn with_base_ccy(mut self, ccy: impl Into<String>) -> Self {
        self.base_ccy = Some(ccy.into());
        self
    }
}

/// Contract terms a pricer consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument id
    pub instrument_id: String,
    /// Product type the terms belong to
    pub product_type: String,
    /// Product-specific terms
    #[serde(default)]
    pub terms: Attributes,
}

impl Instrument {
    /// Build an instrument from a position's own attributes.
    pub fn inline(position: &Position) -> Self {
        Self {
            instrument_id: position
                .instrument_id
                .clone()
                .unwrap_or_else(|| position.position_id.clone()),
            product_type: position.product_type.clone(),
            terms: position.attributes.clone(),
        }
    }

    /// Parse the terms into a pricer's typed representation.
    pub fn parse_terms<T: DeserializeOwned>(&self) -> Result<T, ComputationError> {
        serde_json::from_value(serde_json::Value::Object(self.terms.clone())).map_err(|e| {
            ComputationError::InvalidTerms(format!("{}: {}", self.instrument_id, e))
        })
    }
}

/// Immutable list of positions plus an optional instrument master extract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Positions in the snapshot
    #[serde(default)]
    pub positions: Vec<Position>,
    /// Instruments referenced by `Position::instrument_id`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instruments: BTreeMap<String, Instrument>,
}

impl PositionSnapshot {
    /// Create a snapshot from positions.
    pub fn new(positions: Vec<Position>) -> Self {
        Self {
            positions,
            instruments: BTreeMap::new(),
        }
    }

    /// Attach an instrument to the snapshot's instrument map.
    pub fn with_instrument(mut self, instrument: Instrument) -> Self {
        self.instruments
            .insert(instrument.instrument_id.clone(), instrument);
        self
    }

    /// Content-addressed id: SHA-256 of the canonical JSON payload.
    pub fn content_id(&self) -> Result<String, ValidationError> {
        Ok(content_hash(self)?)
    }

    /// Structural validation performed before a snapshot is persisted.
    ///
    /// Fails when the snapshot is empty, a position lacks an id or product
    /// type, or two positions share an id.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.positions.is_empty() {
            return Err(ValidationError::EmptyPositions);
        }

        let mut seen = HashSet::with_capacity(self.positions.len());
        for (index, p) in self.positions.iter().enumerate() {
            if p.position_id.trim().is_empty() {
                return Err(ValidationError::MissingPositionId { index });
            }
            if p.product_type.trim().is_empty() {
                return Err(ValidationError::MissingProductType {
                    position_id: p.position_id.clone(),
                });
            }
            if !seen.insert(p.position_id.as_str()) {
                return Err(ValidationError::DuplicatePosition(p.position_id.clone()));
            }
        }
        Ok(())
    }

    /// Distinct product types present, sorted.
    pub fn product_types(&self) -> BTreeSet<&str> {
        self.positions
            .iter()
            .map(|p| p.product_type.as_str())
            .collect()
    }

    /// Positions owned by the `(product_type, shard)` task.
    pub fn shard<'a>(
        &'a self,
        product_type: &'a str,
        shard: ShardKey,
    ) -> impl Iterator<Item = &'a Position> + 'a {
        self.positions
            .iter()
            .filter(move |p| p.product_type == product_type && shard.owns(&p.position_id))
    }

    /// Resolve the instrument a position prices against.
    ///
    /// A position whose `instrument_id` is in the instrument map uses that
    /// instrument. A position carrying its own attributes uses them inline.
    /// A position that references an instrument by id only, with no
    /// attributes and no map entry, returns `None`.
    pub fn resolve_instrument(&self, position: &Position) -> Option<Instrument> {
        match &position.instrument_id {
            Some(id) => match self.instruments.get(id) {
                Some(inst) => Some(inst.clone()),
                None if position.attributes.is_empty() => None,
                None => Some(Instrument::inline(position)),
            },
            None => Some(Instrument::inline(position)),
        }
    }
}
