//! Serializable backtest result with schema versioning.

use chrono::{DateTime, Utc};
use mtflab_core::engine::BacktestReport;
use mtflab_core::perf::{EquitySample, Summary};
use mtflab_core::position::TradeRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever the persisted shape changes; loads reject newer
/// versions.
pub const SCHEMA_VERSION: u32 = 1;

/// A finished run, flattened for JSON/CSV artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub schema_version: u32,
    pub symbol: String,
    pub base_timeframe: String,
    pub initial_capital: f64,
    pub bar_count: usize,
    pub cancelled: bool,
    pub risk_cap_rejections: u64,
    pub summary: Summary,
    pub per_strategy: BTreeMap<String, Summary>,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquitySample>,
    pub generated_at: DateTime<Utc>,
    /// Wall-clock runtime, set by the runner.
    pub duration_secs: f64,
}

impl BacktestResult {
    pub fn from_report(report: BacktestReport, symbol: &str, initial_capital: f64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            symbol: symbol.to_string(),
            base_timeframe: report.base_timeframe.standard(),
            initial_capital,
            bar_count: report.bar_count,
            cancelled: report.cancelled,
            risk_cap_rejections: report.risk_cap_rejections,
            summary: report.summary,
            per_strategy: report.per_strategy,
            trades: report.trades,
            equity_curve: report.equity,
            generated_at: Utc::now(),
            duration_secs: 0.0,
        }
    }
}
