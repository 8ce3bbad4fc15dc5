//! Multi-timeframe pipeline: synthetic data with indicator columns,
//! config-built strategies, and a lookahead probe over the aligned view
//! the engine actually hands to strategies.

use chrono::{DateTime, TimeZone, Utc};
use mtflab_core::data::{AlignedRow, MarketFrame};
use mtflab_core::domain::SymbolMeta;
use mtflab_core::engine::{Engine, EngineConfig};
use mtflab_core::position::{Position, StopRule, TradePlan};
use mtflab_core::strategy::{
    Signal, Strategy, StrategyError, StrategyMetadata, StrategyParams,
};
use mtflab_runner::config::RunConfig;
use mtflab_runner::runner::run_backtest;
use mtflab_runner::synthetic::{random_walk_frames, with_ema_columns};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Two days of consistent 5m/1h data with EMA columns on both frames.
fn mtf_frames(seed: u64) -> BTreeMap<String, MarketFrame> {
    let mut frames = random_walk_frames("BTCUSDT", seed, start(), 576, "5m", Some("1h"));
    let base = frames.remove("5m").unwrap();
    let higher = frames.remove("1h").unwrap();
    frames.insert("5m".to_string(), with_ema_columns(base, 33, 133));
    frames.insert("1h".to_string(), with_ema_columns(higher, 33, 144));
    frames
}

const MTF_CONFIG: &str = r#"
[backtest]
initial_capital = 10000.0
per_trade_risk = 0.01
max_total_risk = 0.06

[symbol]
symbol = "BTCUSDT"
asset_type = "crypto"
exchange = "binance"

[[strategy]]
id = "mtf_trend"
timeframe = "5m"
higher_timeframe = "1h"
"#;

#[test]
fn mtf_trend_runs_end_to_end() {
    let config = RunConfig::from_toml(MTF_CONFIG).unwrap();
    let result = run_backtest(&config, &mtf_frames(7)).unwrap();

    // Leading 5m rows are dropped until the first 1h bar has closed.
    assert!(result.bar_count > 500 && result.bar_count < 576);
    assert_eq!(result.equity_curve.len(), result.bar_count);
    assert!(result.summary.final_equity.is_finite());
    assert!(result.per_strategy.contains_key("mtf_trend"));

    // Whatever traded came from the partial ladder, the stop, or the
    // end-of-data flush; the hook never fires for this strategy.
    for trade in &result.trades {
        assert_ne!(trade.close_reason.as_str(), "strategy_exit");
        assert!(trade.initial_risk > 0.0);
    }
}

#[test]
fn mtf_pipeline_is_deterministic() {
    let config = RunConfig::from_toml(MTF_CONFIG).unwrap();
    let a = run_backtest(&config, &mtf_frames(21)).unwrap();
    let b = run_backtest(&config, &mtf_frames(21)).unwrap();

    assert_eq!(a.trades.len(), b.trades.len());
    for (x, y) in a.trades.iter().zip(&b.trades) {
        assert_eq!(x.entry_time, y.entry_time);
        assert_eq!(x.entry_price.to_bits(), y.entry_price.to_bits());
        assert_eq!(x.realized_pnl.to_bits(), y.realized_pnl.to_bits());
    }
    for (x, y) in a.equity_curve.iter().zip(&b.equity_curve) {
        assert_eq!(x.total().to_bits(), y.total().to_bits());
    }
}

/// Records the higher-timeframe close visible on every row it is shown.
#[derive(Debug)]
struct Probe {
    metadata: StrategyMetadata,
    params: StrategyParams,
    seen: Arc<Mutex<Vec<(DateTime<Utc>, f64)>>>,
}

impl Probe {
    fn new(seen: Arc<Mutex<Vec<(DateTime<Utc>, f64)>>>) -> Self {
        Self {
            metadata: StrategyMetadata {
                id: "probe",
                name: "probe",
                description: "records the h1 close visible per bar",
                required_timeframes: vec!["5m".to_string(), "1h".to_string()],
                base_timeframe: "5m".to_string(),
                uses_custom_sl: false,
                uses_custom_tp: false,
                params: Vec::new(),
            },
            params: StrategyParams::default(),
            seen,
        }
    }
}

impl Strategy for Probe {
    fn metadata(&self) -> &StrategyMetadata {
        &self.metadata
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn generate_signals(
        &mut self,
        row: &AlignedRow<'_>,
        t: DateTime<Utc>,
    ) -> Result<Option<Signal>, StrategyError> {
        if let Some(h1_close) = row.get("h1_close") {
            self.seen.lock().unwrap().push((t, h1_close));
        }
        Ok(None)
    }

    fn trade_plan(&self, _signal: &Signal, _row: &AlignedRow<'_>) -> TradePlan {
        TradePlan {
            stop: StopRule::Percent(1.0),
            target: None,
            partial_exits: Vec::new(),
        }
    }

    fn should_exit(
        &self,
        _position: &Position,
        _row: &AlignedRow<'_>,
        _t: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        Ok(false)
    }
}

#[test]
fn no_lookahead_through_the_engine() {
    let frames = mtf_frames(5);
    let h1 = frames["1h"].clone();
    let one_hour = chrono::Duration::hours(1);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut engine = Engine::new(EngineConfig::new(10_000.0));
    engine.register(Box::new(Probe::new(seen.clone())));
    engine
        .run(&frames, &SymbolMeta::crypto("BTCUSDT", "binance"))
        .unwrap();

    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());

    for &(t, visible_close) in seen.iter() {
        // The expected bar is the last 1h bar fully closed before the
        // base bar's close time `t`. A 1h bar closing exactly at `t`
        // does not count: the base bar sitting on that boundary belongs
        // to it.
        let expected = h1
            .bars()
            .iter()
            .rev()
            .find(|b| b.timestamp + one_hour < t)
            .expect("a closed 1h bar must exist for every surviving row");
        assert_eq!(
            visible_close, expected.close,
            "row at {t} saw a 1h bar that had not closed yet"
        );

        // And never the bar that is still open at `t`.
        if let Some(open_bar) = h1
            .bars()
            .iter()
            .find(|b| b.timestamp < t && t < b.timestamp + one_hour)
        {
            assert_ne!(visible_close, open_bar.close);
        }
    }
}

#[test]
fn probe_side_never_trades() {
    let frames = mtf_frames(9);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut engine = Engine::new(EngineConfig::new(10_000.0));
    engine.register(Box::new(Probe::new(seen)));
    let report = engine
        .run(&frames, &SymbolMeta::crypto("BTCUSDT", "binance"))
        .unwrap();
    assert!(report.trades.is_empty());
    assert_eq!(report.risk_cap_rejections, 0);
}
