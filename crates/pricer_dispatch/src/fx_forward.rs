//! FX forward pricer.
//!
//! Forward rate from covered interest parity:
//! `F = S * DF_base(T) / DF_quote(T)`, PV in quote currency
//! `sign * N * (F - K) * DF_quote(T)`, delta to spot `sign * N * DF_base(T)`.

use serde::{Deserialize, Serialize};

use pricer_core::types::{ComputationError, Instrument, MarketView, Measures, Position};

use crate::registry::{check_measures, Pricer};

/// Product type handled by [`FxForwardPricer`].
pub const FX_FWD: &str = "FX_FWD";

const MEASURES: &[&str] = &["PV", "FWD_RATE", "DELTA"];

/// Typed FX forward terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FxForwardTerms {
    /// Six-letter pair, base then quote (e.g. `EURUSD`)
    pub pair: String,
    /// Notional in base currency
    pub notional: f64,
    /// Contract rate, quote per base
    pub strike: f64,
    /// Time to delivery in years
    pub maturity_years: f64,
    /// Buy base currency forward
    #[serde(default = "default_buy")]
    pub buy: bool,
}

fn default_buy() -> bool {
    true
}

impl FxForwardTerms {
    fn check(&self) -> Result<(), ComputationError> {
        if self.pair.len() != 6 || !self.pair.is_ascii() {
            return Err(ComputationError::InvalidTerms(format!(
                "pair must be six letters, got {}",
                self.pair
            )));
        }
        if !self.notional.is_finite() || !self.strike.is_finite() || self.strike <= 0.0 {
            return Err(ComputationError::InvalidTerms(
                "notional must be finite and strike positive".to_string(),
            ));
        }
        if !self.maturity_years.is_finite() || self.maturity_years < 0.0 {
            return Err(ComputationError::InvalidTerms(format!(
                "maturity_years must be non-negative, got {}",
                self.maturity_years
            )));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        &self.pair[..3]
    }

    fn quote(&self) -> &str {
        &self.pair[3..]
    }
}

/// Reference `FX_FWD` pricer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FxForwardPricer;

impl Pricer for FxForwardPricer {
    fn product_type(&self) -> &str {
        FX_FWD
    }

    fn supported_measures(&self) -> &[&'static str] {
        MEASURES
    }

    fn validate(&self, instrument: &Instrument) -> Result<(), ComputationError> {
        instrument.parse_terms::<FxForwardTerms>()?.check()
    }

    fn price(
        &self,
        _position: &Position,
        instrument: &Instrument,
        market: &MarketView<'_>,
        measures: &[String],
    ) -> Result<Measures, ComputationError> {
        check_measures(FX_FWD, MEASURES, measures)?;
        let terms: FxForwardTerms = instrument.parse_terms()?;
        terms.check()?;

        let t = terms.maturity_years;
        let spot = market.fx_spot(&terms.pair)?;
        let df_base = market.discount_factor(terms.base(), t)?;
        let df_quote = market.discount_factor(terms.quote(), t)?;
        let forward = spot * df_base / df_quote;
        let sign = if terms.buy { 1.0 } else { -1.0 };

        let mut out = Measures::new();
        for m in measures {
            let value = match m.as_str() {
                "PV" => sign * terms.notional * (forward - terms.strike) * df_quote,
                "FWD_RATE" => forward,
                "DELTA" => sign * terms.notional * df_base,
                _ => unreachable!("filtered by check_measures"),
            };
            out.insert(m.clone(), value);
        }
        Ok(out)
    }
}
