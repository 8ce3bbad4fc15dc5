//! Backtest engine: run configuration, cancellation, and the report.

pub mod run;

pub use run::Engine;

use crate::data::AlignError;
use crate::domain::{Timeframe, TimeframeError};
use crate::perf::{EquitySample, Summary};
use crate::position::TradeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Configuration for a single backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    /// Cap on summed open initial risk, fraction of effective capital.
    pub max_total_risk: f64,
    /// Per-trade risk, fraction of effective capital.
    pub per_trade_risk: f64,
    /// Risk fractions apply to current equity instead of initial capital.
    pub use_compounding: bool,
    /// Inclusive clip on bar close times.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Session-calendar minutes per year for annualization; defaults to
    /// 24x365 when absent.
    pub minutes_per_trading_year: Option<f64>,
}

impl EngineConfig {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            max_total_risk: 0.06,
            per_trade_risk: 0.01,
            use_compounding: false,
            start_time: None,
            end_time: None,
            minutes_per_trading_year: None,
        }
    }

    pub fn with_risk(mut self, per_trade: f64, max_total: f64) -> Self {
        self.per_trade_risk = per_trade;
        self.max_total_risk = max_total;
        self
    }

    pub fn with_compounding(mut self, on: bool) -> Self {
        self.use_compounding = on;
        self
    }

    pub fn with_window(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }
}

/// Cooperative cancellation flag, checked between bars. Cloneable so a
/// controlling thread can flip it while the run owns the engine.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Align(#[from] AlignError),

    #[error(transparent)]
    Timeframe(#[from] TimeframeError),

    #[error("no strategies registered")]
    NoStrategies,
}

/// Everything a finished (or cancelled) run produced.
#[derive(Debug)]
pub struct BacktestReport {
    pub summary: Summary,
    /// Same shape as `summary`, scoped to each strategy's trades.
    pub per_strategy: BTreeMap<String, Summary>,
    pub trades: Vec<TradeRecord>,
    pub equity: Vec<EquitySample>,
    /// Signals dropped by the account-wide risk cap.
    pub risk_cap_rejections: u64,
    pub bar_count: usize,
    pub base_timeframe: Timeframe,
    /// True when the run stopped on the cancel token; results are
    /// partial and every position closed as `manual_exit`.
    pub cancelled: bool,
}
