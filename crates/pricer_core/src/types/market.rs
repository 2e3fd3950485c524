//! Market snapshot payloads and scenario views.
//!
//! A `MarketSnapshot` holds zero curves keyed by currency, FX spots keyed by
//! pair (`EURUSD` = USD per EUR) and named scenario shocks. Pricers never see
//! the raw snapshot: they get a `MarketView` with the scenario shock applied.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ComputationError, ValidationError};
use crate::hashing::content_hash;

/// Scenario id that applies no shock.
pub const BASE_SCENARIO: &str = "BASE";

/// Pillar-based zero curve with continuously compounded rates.
///
/// Zero rates are interpolated linearly between pillars and extrapolated
/// flat beyond them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curve {
    /// Pillar tenors in years, strictly increasing
    pub tenors: Vec<f64>,
    /// Zero rates at each pillar
    pub zero_rates: Vec<f64>,
}

impl Curve {
    /// Construct a validated curve.
    pub fn new(tenors: Vec<f64>, zero_rates: Vec<f64>) -> Result<Self, ValidationError> {
        let curve = Self { tenors, zero_rates };
        curve.validate()?;
        Ok(curve)
    }

    /// Flat curve at a single rate.
    pub fn flat(rate: f64) -> Self {
        Self {
            tenors: vec![1.0],
            zero_rates: vec![rate],
        }
    }

    /// Check pillar structure.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tenors.is_empty() {
            return Err(ValidationError::InvalidMarketData(
                "curve has no pillars".to_string(),
            ));
        }
        if self.tenors.len() != self.zero_rates.len() {
            return Err(ValidationError::InvalidMarketData(format!(
                "curve has {} tenors but {} rates",
                self.tenors.len(),
                self.zero_rates.len()
            )));
        }
        if self
            .tenors
            .iter()
            .chain(self.zero_rates.iter())
            .any(|x| !x.is_finite())
        {
            return Err(ValidationError::InvalidMarketData(
                "curve contains non-finite values".to_string(),
            ));
        }
        if self.tenors.windows(2).any(|w| w[1] <= w[0]) || self.tenors[0] < 0.0 {
            return Err(ValidationError::InvalidMarketData(
                "curve tenors must be non-negative and strictly increasing".to_string(),
            ));
        }
        Ok(())
    }

    /// Zero rate at `t` years.
    ///
    /// Only meaningful on a curve that passes [`Curve::validate`]; on a
    /// malformed curve the result is unspecified but never panics.
    pub fn zero_rate(&self, t: f64) -> f64 {
        let n = self.tenors.len().min(self.zero_rates.len());
        if n == 0 {
            return 0.0;
        }
        if t <= self.tenors[0] {
            return self.zero_rates[0];
        }
        if n == 1 || t >= self.tenors[n - 1] {
            return self.zero_rates[n - 1];
        }
        let i = self.tenors[..n]
            .partition_point(|&x| x <= t)
            .clamp(1, n - 1);
        let (t0, t1) = (self.tenors[i - 1], self.tenors[i]);
        let (r0, r1) = (self.zero_rates[i - 1], self.zero_rates[i]);
        r0 + (r1 - r0) * (t - t0) / (t1 - t0)
    }

    /// Discount factor `exp(-r(t) t)`.
    #[inline]
    pub fn discount_factor(&self, t: f64) -> f64 {
        (-self.zero_rate(t) * t).exp()
    }
}

/// A named market shock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioShock {
    /// Parallel shift applied to every zero curve, in basis points
    #[serde(default)]
    pub rate_shift_bp: f64,
    /// Relative shift applied to every FX spot, in percent
    #[serde(default)]
    pub fx_shift_pct: f64,
}

/// Immutable market data payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Observation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
    /// Zero curves keyed by currency code
    #[serde(default)]
    pub curves: BTreeMap<String, Curve>,
    /// FX spots keyed by six-letter pair
    #[serde(default)]
    pub fx_spots: BTreeMap<String, f64>,
    /// Named scenario shocks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scenarios: BTreeMap<String, ScenarioShock>,
}

impl MarketSnapshot {
    /// Add a curve.
    pub fn with_curve(mut self, ccy: impl Into<String>, curve: Curve) -> Self {
        self.curves.insert(ccy.into(), curve);
        self
    }

    /// Add an FX spot.
    pub fn with_fx_spot(mut self, pair: impl Into<String>, spot: f64) -> Self {
        self.fx_spots.insert(pair.into(), spot);
        self
    }

    /// Add a named scenario.
    pub fn with_scenario(mut self, id: impl Into<String>, shock: ScenarioShock) -> Self {
        self.scenarios.insert(id.into(), shock);
        self
    }

    /// Content-addressed id: SHA-256 of the canonical JSON payload.
    pub fn content_id(&self) -> Result<String, ValidationError> {
        Ok(content_hash(self)?)
    }

    /// Structural validation performed at ingestion.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (ccy, curve) in &self.curves {
            curve.validate().map_err(|e| {
                ValidationError::InvalidMarketData(format!("curve {}: {}", ccy, e))
            })?;
        }
        for (pair, spot) in &self.fx_spots {
            if pair.len() != 6 || !pair.is_ascii() || !spot.is_finite() || *spot <= 0.0 {
                return Err(ValidationError::InvalidMarketData(format!(
                    "bad FX spot {} = {}",
                    pair, spot
                )));
            }
        }
        if self.scenarios.contains_key(BASE_SCENARIO) {
            return Err(ValidationError::InvalidMarketData(
                "scenario BASE is reserved".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve a scenario id into a shocked view.
    pub fn scenario(&self, scenario_id: &str) -> Result<MarketView<'_>, ComputationError> {
        let shock = if scenario_id == BASE_SCENARIO {
            ScenarioShock::default()
        } else {
            *self
                .scenarios
                .get(scenario_id)
                .ok_or_else(|| ComputationError::UnknownScenario(scenario_id.to_string()))?
        };
        Ok(MarketView {
            snapshot: self,
            shock,
        })
    }
}

/// Market snapshot seen through a scenario shock.
#[derive(Debug, Clone, Copy)]
pub struct MarketView<'a> {
    snapshot: &'a MarketSnapshot,
    shock: ScenarioShock,
}

impl<'a> MarketView<'a> {
    /// The active shock.
    pub fn shock(&self) -> ScenarioShock {
        self.shock
    }

    /// Same view with an additional parallel rate bump, for sensitivities.
    pub fn bumped(&self, rate_bp: f64) -> Self {
        let mut shock = self.shock;
        shock.rate_shift_bp += rate_bp;
        Self {
            snapshot: self.snapshot,
            shock,
        }
    }

    /// Shocked discount factor for `ccy` at `t` years.
    pub fn discount_factor(&self, ccy: &str, t: f64) -> Result<f64, ComputationError> {
        let curve = self
            .snapshot
            .curves
            .get(ccy)
            .ok_or_else(|| ComputationError::MissingCurve(ccy.to_string()))?;
        // Snapshots written straight to a store skip ingestion checks.
        curve
            .validate()
            .map_err(|e| ComputationError::InvalidMarketData(format!("curve {}: {}", ccy, e)))?;
        let r = curve.zero_rate(t) + self.shock.rate_shift_bp * 1e-4;
        Ok((-r * t).exp())
    }

    /// Shocked FX spot for a six-letter pair. Falls back to the inverse pair.
    pub fn fx_spot(&self, pair: &str) -> Result<f64, ComputationError> {
        let raw = match self.snapshot.fx_spots.get(pair) {
            Some(s) => *s,
            None => {
                let inverse = if pair.len() == 6 && pair.is_ascii() {
                    format!("{}{}", &pair[3..], &pair[..3])
                } else {
                    String::new()
                };
                match self.snapshot.fx_spots.get(&inverse) {
                    Some(s) if *s != 0.0 => 1.0 / *s,
                    _ => return Err(ComputationError::MissingFxSpot(pair.to_string())),
                }
            }
        };
        Ok(raw * (1.0 + self.shock.fx_shift_pct / 100.0))
    }
}
