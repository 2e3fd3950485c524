//! Typed valuation payloads.
//!
//! This module provides:
//! - `Position`, `Instrument`, `PositionSnapshot`: portfolio content (`position`)
//! - `MarketSnapshot`, `Curve`, `ScenarioShock`, `MarketView`: market content (`market`)
//! - `ValidationError`, `ComputationError`: error taxonomy (`error`)

pub mod error;
pub mod market;
pub mod position;

pub use error::{ComputationError, ValidationError};
pub use market::{Curve, MarketSnapshot, MarketView, ScenarioShock, BASE_SCENARIO};
pub use position::{Attributes, Instrument, Position, PositionSnapshot};

use std::collections::BTreeMap;

/// Measure name to computed value. Ordered so serialisation is deterministic.
pub type Measures = BTreeMap<String, f64>;
