//! # pricer_dispatch: Pricer Dispatch for the Valuation Grid
//!
//! Maps a product-type string onto a [`Pricer`] implementation. The mapping
//! is an explicit [`PricerRegistry`] value built at start-up and injected into
//! whatever needs it, so tests can substitute pricers freely.
//!
//! ## Contract
//!
//! `price(product_type, position, instrument, market, measures, scenario_id)`
//! returns a measure map or a [`ComputationError`]. Repeated invocation with
//! identical inputs must return identical output: result convergence under
//! retried tasks depends on it.
//!
//! ## Reference pricers
//!
//! - [`FxForwardPricer`] (`FX_FWD`): `PV`, `FWD_RATE`, `DELTA`
//! - [`AmortLoanPricer`] (`AMORT_LOAN`): `PV`, `DV01`, `PAYMENT`

mod amort_loan;
mod fx_forward;
mod registry;

pub use amort_loan::{AmortLoanPricer, AmortLoanTerms, AMORT_LOAN};
pub use fx_forward::{FxForwardPricer, FxForwardTerms, FX_FWD};
pub use registry::{Pricer, PricerRegistry};

pub use pricer_core::types::{ComputationError, Measures};
