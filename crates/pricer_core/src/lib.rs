//! # pricer_core: Foundation Types for the Valuation Grid
//!
//! ## Layer 1 (Foundation) Role
//!
//! pricer_core is the bottom layer of the valuation grid, providing:
//! - Shard key function: `bucket` (`shard`)
//! - Canonical JSON and SHA-256 content hashing (`hashing`)
//! - Typed position, instrument and market snapshot payloads (`types`)
//! - Error types: `ValidationError`, `ComputationError` (`types::error`)
//!
//! ## Zero Dependency Principle
//!
//! Layer 1 has no dependencies on other workspace crates. Everything here is
//! pure: no I/O, no clocks beyond the optional `as_of` stamp on market data.
//!
//! ## Usage Examples
//!
//! ```rust
//! use pricer_core::shard::bucket;
//!
//! let b = bucket("POS-000042", 4);
//! assert!(b < 4);
//! assert_eq!(b, bucket("POS-000042", 4));
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod hashing;
pub mod shard;
pub mod types;

pub use types::{
    ComputationError, Curve, Instrument, MarketSnapshot, MarketView, Measures, Position,
    PositionSnapshot, ScenarioShock, ValidationError,
};
