//! Amortising loan pricer.
//!
//! Level-payment annuity: `payments_per_year * maturity_years` equal payments
//! of `N * r / (1 - (1 + r)^-n)` with periodic rate `r = rate / m`. PV
//! discounts each payment on the currency's zero curve; DV01 is the PV change
//! for a one basis point parallel rise.

use serde::{Deserialize, Serialize};

use pricer_core::types::{ComputationError, Instrument, MarketView, Measures, Position};

use crate::registry::{check_measures, Pricer};

/// Product type handled by [`AmortLoanPricer`].
pub const AMORT_LOAN: &str = "AMORT_LOAN";

const MEASURES: &[&str] = &["PV", "DV01", "PAYMENT"];

/// Payment schedule cap: daily payments over a century.
pub const MAX_PERIODS: u32 = 36_500;

/// Typed amortising loan terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmortLoanTerms {
    /// Loan currency
    pub currency: String,
    /// Principal
    pub notional: f64,
    /// Annual contract rate
    pub rate: f64,
    /// Term in years
    pub maturity_years: f64,
    /// Payment frequency
    #[serde(default = "default_frequency")]
    pub payments_per_year: u32,
}

fn default_frequency() -> u32 {
    12
}

impl AmortLoanTerms {
    fn check(&self) -> Result<(), ComputationError> {
        if self.currency.trim().is_empty() {
            return Err(ComputationError::InvalidTerms(
                "currency is required".to_string(),
            ));
        }
        if !self.notional.is_finite() || !self.rate.is_finite() || self.rate <= -1.0 {
            return Err(ComputationError::InvalidTerms(
                "notional and rate must be finite".to_string(),
            ));
        }
        if self.payments_per_year == 0 || !self.maturity_years.is_finite() || self.maturity_years <= 0.0
        {
            return Err(ComputationError::InvalidTerms(
                "maturity_years and payments_per_year must be positive".to_string(),
            ));
        }
        let periods = (self.maturity_years * f64::from(self.payments_per_year)).round();
        if periods > f64::from(MAX_PERIODS) {
            return Err(ComputationError::InvalidTerms(format!(
                "schedule has {} payments, at most {} allowed",
                periods, MAX_PERIODS
            )));
        }
        Ok(())
    }

    /// Payment count; `check` bounds it by [`MAX_PERIODS`].
    fn periods(&self) -> u32 {
        let n = (self.maturity_years * f64::from(self.payments_per_year)).round();
        (n.min(f64::from(MAX_PERIODS)) as u32).max(1)
    }

    fn payment(&self) -> f64 {
        let n = self.periods();
        let r = self.rate / f64::from(self.payments_per_year);
        if r.abs() < 1e-14 {
            self.notional / f64::from(n)
        } else {
            self.notional * r / (1.0 - (1.0 + r).powi(-(n as i32)))
        }
    }

    fn present_value(&self, market: &MarketView<'_>) -> Result<f64, ComputationError> {
        let payment = self.payment();
        let dt = 1.0 / f64::from(self.payments_per_year);
        (1..=self.periods()).try_fold(0.0, |acc, k| {
            let df = market.discount_factor(&self.currency, f64::from(k) * dt)?;
            Ok(acc + payment * df)
        })
    }
}

/// Reference `AMORT_LOAN` pricer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmortLoanPricer;

impl Pricer for AmortLoanPricer {
    fn product_type(&self) -> &str {
        AMORT_LOAN
    }

    fn supported_measures(&self) -> &[&'static str] {
        MEASURES
    }

    fn validate(&self, instrument: &Instrument) -> Result<(), ComputationError> {
        instrument.parse_terms::<AmortLoanTerms>()?.check()
    }

    fn price(
        &self,
        _position: &Position,
        instrument: &Instrument,
        market: &MarketView<'_>,
        measures: &[String],
    ) -> Result<Measures, ComputationError> {
        check_measures(AMORT_LOAN, MEASURES, measures)?;
        let terms: AmortLoanTerms = instrument.parse_terms()?;
        terms.check()?;

        let mut out = Measures::new();
        for m in measures {
            let value = match m.as_str() {
                "PV" => terms.present_value(market)?,
                "DV01" => terms.present_value(&market.bumped(1.0))? - terms.present_value(market)?,
                "PAYMENT" => terms.payment(),
                _ => unreachable!("filtered by check_measures"),
            };
            out.insert(m.clone(), value);
        }
        Ok(out)
    }
}
