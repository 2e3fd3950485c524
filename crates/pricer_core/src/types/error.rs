//! Error types for structured error handling.
//!
//! This module provides:
//! - `ValidationError`: malformed run requests and snapshots, raised at the
//!   ingestion boundary before anything is persisted
//! - `ComputationError`: pricer failures for one position and scenario

use thiserror::Error;

/// Errors raised while validating inputs at the ingestion boundary.
///
/// # Examples
/// ```
/// use pricer_core::types::ValidationError;
///
/// let err = ValidationError::MissingProductType { position_id: "P1".to_string() };
/// assert_eq!(format!("{}", err), "Position P1 has no product_type");
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The position snapshot contains no positions.
    #[error("Position snapshot contains no positions")]
    EmptyPositions,

    /// A position lacks a product type.
    #[error("Position {position_id} has no product_type")]
    MissingProductType {
        /// Offending position
        position_id: String,
    },

    /// A position lacks an id.
    #[error("Position at index {index} has no position_id")]
    MissingPositionId {
        /// Index in the snapshot's position list
        index: usize,
    },

    /// Two positions share an id.
    #[error("Duplicate position_id: {0}")]
    DuplicatePosition(String),

    /// The run request names no measures.
    #[error("Run request has no measures")]
    NoMeasures,

    /// The run request names no scenarios.
    #[error("Run request has no scenarios")]
    NoScenarios,

    /// Neither a snapshot id nor inline positions were supplied, or both were.
    #[error("Run request must carry exactly one of position_snapshot_id or positions")]
    AmbiguousPositionSource,

    /// A referenced snapshot does not exist.
    #[error("Unknown {kind} snapshot: {id}")]
    UnknownSnapshot {
        /// `position` or `market`
        kind: &'static str,
        /// Snapshot id
        id: String,
    },

    /// A scalar field has an invalid value.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// No pricer is registered for a position's product type.
    #[error("Unsupported product type {product_type} on position {position_id}")]
    UnsupportedProductType {
        /// Offending position
        position_id: String,
        /// Unregistered product type
        product_type: String,
    },

    /// A position's attributes do not parse into its pricer's terms.
    #[error("Invalid terms on position {position_id}: {reason}")]
    InvalidTerms {
        /// Offending position
        position_id: String,
        /// Parse failure
        reason: String,
    },

    /// Market data is structurally invalid.
    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    /// The payload could not be serialised for hashing.
    #[error("Serialisation error: {0}")]
    Serialisation(String),
}

impl ValidationError {
    /// Create an invalid field error
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialisation(err.to_string())
    }
}

/// Errors returned by pricer dispatch for a single (position, scenario).
///
/// Any of these aborts the whole task batch; the worker records the message
/// on the task row and counts it against the attempt budget.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputationError {
    /// No discount curve for a currency.
    #[error("Missing curve: {0}")]
    MissingCurve(String),

    /// No FX spot for a currency pair.
    #[error("Missing FX spot: {0}")]
    MissingFxSpot(String),

    /// Instrument terms are unusable.
    #[error("Invalid instrument terms: {0}")]
    InvalidTerms(String),

    /// The pricer does not produce this measure.
    #[error("Unsupported measure {measure} for {product_type}")]
    UnsupportedMeasure {
        /// Product type being priced
        product_type: String,
        /// Requested measure
        measure: String,
    },

    /// No pricer is registered for the product type.
    #[error("No pricer registered for product type {0}")]
    UnsupportedProductType(String),

    /// The scenario id is neither `BASE` nor defined on the market snapshot.
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Market data on the snapshot is structurally unusable.
    #[error("Invalid market data: {0}")]
    InvalidMarketData(String),

    /// The computation produced a non-finite value.
    #[error("Numerical failure: {0}")]
    NumericalFailure(String),
}
