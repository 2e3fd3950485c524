//! Fixtures shared by the engine integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use infra_config::RunConfig;
use infra_store::{InMemoryStore, Store};
use pricer_core::shard::bucket;
use pricer_core::types::{
    Attributes, ComputationError, Curve, Instrument, MarketSnapshot, MarketView, Measures,
    Position, ScenarioShock,
};
use pricer_dispatch::{Pricer, PricerRegistry, AMORT_LOAN, FX_FWD};
use serde_json::{json, Value};
use service_engine::{ingest_market_snapshot, RunDecomposer, Worker, WorkerSettings};

pub const RATES_UP: &str = "RATES_UP_10";

pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap()
}

pub fn fx_position(id: &str) -> Position {
    Position::new(
        id,
        FX_FWD,
        attrs(json!({
            "pair": "EURUSD", "notional": 1_000_000.0, "strike": 1.08,
            "maturity_years": 1.0
        })),
    )
    .with_base_ccy("USD")
    .with_portfolio_node("BOOK-FX")
}

pub fn loan_position(id: &str) -> Position {
    Position::new(
        id,
        AMORT_LOAN,
        attrs(json!({
            "currency": "USD", "notional": 250_000.0, "rate": 0.06,
            "maturity_years": 5.0
        })),
    )
    .with_base_ccy("USD")
    .with_portfolio_node("BOOK-LOANS")
}

pub fn market() -> MarketSnapshot {
    MarketSnapshot::default()
        .with_curve("EUR", Curve::flat(0.02))
        .with_curve("USD", Curve::flat(0.04))
        .with_fx_spot("EURUSD", 1.10)
        .with_scenario(
            RATES_UP,
            ScenarioShock {
                rate_shift_bp: 10.0,
                fx_shift_pct: 0.0,
            },
        )
}

/// First id of the form `<prefix>-<n>` that lands in `target` of `hash_mod`.
pub fn id_in_bucket(prefix: &str, hash_mod: u32, target: u32) -> String {
    (0..10_000)
        .map(|n| format!("{}-{}", prefix, n))
        .find(|id| bucket(id, hash_mod) == target)
        .unwrap()
}

pub struct Grid {
    pub store: Arc<InMemoryStore>,
    pub registry: Arc<PricerRegistry>,
    pub market_id: String,
}

impl Grid {
    pub async fn new() -> Self {
        Self::with_store(InMemoryStore::new(), PricerRegistry::with_defaults()).await
    }

    pub async fn with_registry(registry: PricerRegistry) -> Self {
        Self::with_store(InMemoryStore::new(), registry).await
    }

    pub async fn with_store(store: InMemoryStore, registry: PricerRegistry) -> Self {
        let store = Arc::new(store);
        let market_id = ingest_market_snapshot(store.as_ref(), &market()).await.unwrap();
        Self {
            store,
            registry: Arc::new(registry),
            market_id,
        }
    }

    pub fn dyn_store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn decomposer(&self) -> RunDecomposer {
        RunDecomposer::new(self.dyn_store(), RunConfig::default())
            .with_registry(Arc::clone(&self.registry))
    }

    pub fn worker(&self, worker_id: &str) -> Worker {
        let settings = WorkerSettings::new(worker_id)
            .with_idle_sleep(Duration::from_millis(10))
            .with_failure_pause(Duration::from_millis(10));
        Worker::new(self.dyn_store(), Arc::clone(&self.registry), settings)
    }
}

/// `FX_FWD` pricer that fails every call.
#[derive(Debug, Default)]
pub struct FailingPricer;

impl Pricer for FailingPricer {
    fn product_type(&self) -> &str {
        FX_FWD
    }

    fn supported_measures(&self) -> &[&'static str] {
        &["PV"]
    }

    fn validate(&self, _instrument: &Instrument) -> Result<(), ComputationError> {
        Ok(())
    }

    fn price(
        &self,
        _position: &Position,
        _instrument: &Instrument,
        _market: &MarketView<'_>,
        _measures: &[String],
    ) -> Result<Measures, ComputationError> {
        Err(ComputationError::MissingCurve("XAU".to_string()))
    }
}

/// `FX_FWD` pricer that records every position it is asked to price.
#[derive(Debug, Default, Clone)]
pub struct RecordingPricer {
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingPricer {
    pub fn calls_for(&self, position_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == position_id)
            .count()
    }
}

impl Pricer for RecordingPricer {
    fn product_type(&self) -> &str {
        FX_FWD
    }

    fn supported_measures(&self) -> &[&'static str] {
        &["PV"]
    }

    fn validate(&self, _instrument: &Instrument) -> Result<(), ComputationError> {
        Ok(())
    }

    fn price(
        &self,
        position: &Position,
        _instrument: &Instrument,
        _market: &MarketView<'_>,
        _measures: &[String],
    ) -> Result<Measures, ComputationError> {
        self.calls.lock().unwrap().push(position.position_id.clone());
        Ok(Measures::from([("PV".to_string(), 1.0)]))
    }
}
