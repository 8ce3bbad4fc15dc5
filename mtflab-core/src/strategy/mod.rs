//! Strategy protocol — the contract between strategies and the engine.
//!
//! # Architecture invariants
//! - Strategies see one aligned row per bar and must never reach for
//!   future rows; the row is the whole lookahead-free world.
//! - Strategies never mutate positions. `should_exit` receives a shared
//!   reference and returns a verdict.
//! - Callback errors never unwind through the engine loop: they are
//!   demoted to "no signal" / "no exit" at the boundary.

pub mod ma_crossover;
pub mod mtf_trend;

use crate::data::AlignedRow;
use crate::position::{Position, PositionSide, TradePlan};
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use ma_crossover::MaCrossover;
pub use mtf_trend::MtfTrend;

/// A strategy's entry decision for one bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    pub side: PositionSide,
    /// Conviction in [0, 1]; informational, not used for sizing.
    pub confidence: f64,
    pub metadata: BTreeMap<String, f64>,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, side: PositionSide, confidence: f64) -> Self {
        Self {
            timestamp,
            side,
            confidence: confidence.clamp(0.0, 1.0),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: f64) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Error raised by a strategy callback. Caught and logged at the engine
/// boundary; a failing callback reads as "no signal" / "no exit".
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StrategyError(pub String);

impl From<String> for StrategyError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for StrategyError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Kind of a configurable parameter, for validation and UI rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Number,
    Toggle,
}

/// Schema entry for one configurable parameter.
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub help: &'static str,
}

impl ParamSpec {
    pub fn number(name: &'static str, default: f64, min: f64, max: f64, help: &'static str) -> Self {
        Self { name, kind: ParamKind::Number, default, min: Some(min), max: Some(max), help }
    }
}

/// Static description of a strategy: identity, timeframe requirements,
/// SL/TP ownership, and the parameter schema.
#[derive(Debug, Clone)]
pub struct StrategyMetadata {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Ordered; the first entry is the base timeframe.
    pub required_timeframes: Vec<String>,
    pub base_timeframe: String,
    /// True when the strategy derives its own stop prices.
    pub uses_custom_sl: bool,
    /// True when the strategy derives its own targets / ladders.
    pub uses_custom_tp: bool,
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("unknown parameter {0:?}")]
    Unknown(String),

    #[error("parameter {name:?} = {value} outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// A strategy's validated parameter values: schema defaults merged with
/// caller overrides, plus an optional trading-day allowlist.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    values: BTreeMap<String, f64>,
    pub allowed_days: Option<Vec<Weekday>>,
}

impl StrategyParams {
    /// Resolve overrides against a schema. Unknown names and out-of-range
    /// values are rejected; unspecified parameters take their defaults.
    pub fn resolve(
        schema: &[ParamSpec],
        overrides: &BTreeMap<String, f64>,
        allowed_days: Option<Vec<Weekday>>,
    ) -> Result<Self, ParamError> {
        let mut values = BTreeMap::new();
        for spec in schema {
            values.insert(spec.name.to_string(), spec.default);
        }
        for (name, &value) in overrides {
            let spec = schema
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| ParamError::Unknown(name.clone()))?;
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if value < min || value > max {
                    return Err(ParamError::OutOfRange {
                        name: name.clone(),
                        value,
                        min,
                        max,
                    });
                }
            }
            values.insert(name.clone(), value);
        }
        Ok(Self { values, allowed_days })
    }

    /// Schema defaults only.
    pub fn defaults(schema: &[ParamSpec]) -> Self {
        Self::resolve(schema, &BTreeMap::new(), None).expect("defaults always validate")
    }

    /// Value of a schema-declared parameter. Panics on names outside the
    /// schema, which `resolve` makes unrepresentable.
    pub fn get(&self, name: &str) -> f64 {
        self.values[name]
    }

    pub fn get_usize(&self, name: &str) -> usize {
        self.get(name) as usize
    }
}

/// The contract every strategy satisfies.
pub trait Strategy: Send + std::fmt::Debug {
    fn metadata(&self) -> &StrategyMetadata;

    fn params(&self) -> &StrategyParams;

    /// Stable identifier used to key positions and per-strategy metrics.
    fn id(&self) -> &str {
        self.metadata().id
    }

    /// Called once per bar, in registration order. `t` is the bar's close
    /// time; an accepted signal opens at this bar's close price.
    fn generate_signals(
        &mut self,
        row: &AlignedRow<'_>,
        t: DateTime<Utc>,
    ) -> Result<Option<Signal>, StrategyError>;

    /// How an accepted signal's stop, target, and partial exits derive.
    fn trade_plan(&self, signal: &Signal, row: &AlignedRow<'_>) -> TradePlan;

    /// Custom exit hook, called after SL/TP/partial/time checks for this
    /// strategy's own open position.
    fn should_exit(
        &self,
        _position: &Position,
        _row: &AlignedRow<'_>,
        _t: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        Ok(false)
    }

    /// Day-of-week gate. The default honours the params' allowlist
    /// against the row's weekday.
    fn is_trading_time_allowed(&self, row: &AlignedRow<'_>, _t: DateTime<Utc>) -> bool {
        match &self.params().allowed_days {
            None => true,
            Some(days) => days.contains(&row.day_of_week()),
        }
    }
}
