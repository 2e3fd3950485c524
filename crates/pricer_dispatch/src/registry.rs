//! The `Pricer` trait and the product-type registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use pricer_core::types::{
    ComputationError, Instrument, MarketSnapshot, MarketView, Measures, Position,
    PositionSnapshot, ValidationError,
};

use crate::{AmortLoanPricer, FxForwardPricer};

/// A valuation function for one product type.
///
/// Implementations must be deterministic: identical inputs give identical
/// measures.
pub trait Pricer: Send + Sync {
    /// Product type this pricer handles, e.g. `FX_FWD`.
    fn product_type(&self) -> &str;

    /// Measures this pricer can produce.
    fn supported_measures(&self) -> &[&'static str];

    /// Check that an instrument's terms parse into this pricer's typed terms.
    fn validate(&self, instrument: &Instrument) -> Result<(), ComputationError>;

    /// Compute the requested measures.
    fn price(
        &self,
        position: &Position,
        instrument: &Instrument,
        market: &MarketView<'_>,
        measures: &[String],
    ) -> Result<Measures, ComputationError>;
}

/// Product type → pricer mapping.
#[derive(Clone, Default)]
pub struct PricerRegistry {
    pricers: BTreeMap<String, Arc<dyn Pricer>>,
}

impl fmt::Debug for PricerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PricerRegistry")
            .field("product_types", &self.product_types())
            .finish()
    }
}

impl PricerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the reference `FX_FWD` and `AMORT_LOAN` pricers.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_pricer(FxForwardPricer)
            .with_pricer(AmortLoanPricer)
    }

    /// Register a pricer, replacing any existing one for the same product type.
    pub fn with_pricer(mut self, pricer: impl Pricer + 'static) -> Self {
        self.register(Arc::new(pricer));
        self
    }

    /// Register a shared pricer.
    pub fn register(&mut self, pricer: Arc<dyn Pricer>) {
        self.pricers.insert(pricer.product_type().to_string(), pricer);
    }

    /// Look up a pricer.
    pub fn get(&self, product_type: &str) -> Option<&Arc<dyn Pricer>> {
        self.pricers.get(product_type)
    }

    /// Registered product types, sorted.
    pub fn product_types(&self) -> Vec<&str> {
        self.pricers.keys().map(String::as_str).collect()
    }

    /// Dispatch one (position, scenario) valuation.
    pub fn price(
        &self,
        product_type: &str,
        position: &Position,
        instrument: &Instrument,
        market: &MarketSnapshot,
        measures: &[String],
        scenario_id: &str,
    ) -> Result<Measures, ComputationError> {
        let pricer = self
            .get(product_type)
            .ok_or_else(|| ComputationError::UnsupportedProductType(product_type.to_string()))?;

        let view = market.scenario(scenario_id)?;
        let values = pricer.price(position, instrument, &view, measures)?;

        if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ComputationError::NumericalFailure(format!(
                "{} = {} for position {}",
                name, value, position.position_id
            )));
        }
        Ok(values)
    }

    /// Ingestion-boundary check: every product type is registered and every
    /// position's terms parse for its pricer.
    pub fn validate_snapshot(&self, snapshot: &PositionSnapshot) -> Result<(), ValidationError> {
        for position in &snapshot.positions {
            let pricer = self.get(&position.product_type).ok_or_else(|| {
                ValidationError::UnsupportedProductType {
                    position_id: position.position_id.clone(),
                    product_type: position.product_type.clone(),
                }
            })?;

            let Some(instrument) = snapshot.resolve_instrument(position) else {
                return Err(ValidationError::InvalidTerms {
                    position_id: position.position_id.clone(),
                    reason: "referenced instrument is not in the snapshot".to_string(),
                });
            };

            pricer
                .validate(&instrument)
                .map_err(|e| ValidationError::InvalidTerms {
                    position_id: position.position_id.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}

/// Reject measures a pricer does not produce.
pub(crate) fn check_measures(
    product_type: &str,
    supported: &[&str],
    measures: &[String],
) -> Result<(), ComputationError> {
    match measures.iter().find(|m| !supported.contains(&m.as_str())) {
        Some(m) => Err(ComputationError::UnsupportedMeasure {
            product_type: product_type.to_string(),
            measure: m.clone(),
        }),
        None => Ok(()),
    }
}
