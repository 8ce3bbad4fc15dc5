//! Single backtest execution orchestration.
//!
//! config -> registry check -> strategies -> engine -> result. Market
//! frames come from the caller (the external loader owns storage and
//! indicator computation).

use anyhow::{bail, Context, Result};
use mtflab_core::data::MarketFrame;
use mtflab_core::engine::Engine;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::RunConfig;
use crate::factory::build_strategy;
use crate::result::BacktestResult;

/// Run one backtest over pre-loaded frames.
pub fn run_backtest(
    config: &RunConfig,
    frames: &BTreeMap<String, MarketFrame>,
) -> Result<BacktestResult> {
    let registry = config.symbol_registry();
    let symbol = config.symbol.symbol.as_str();
    if !registry.is_active(symbol) {
        bail!("symbol {symbol:?} is not active in the configured symbol lists");
    }

    let meta = config
        .symbol_meta()
        .context("invalid [symbol] section")?;

    let mut engine = Engine::new(config.engine_config());
    for section in &config.strategies {
        let strategy = build_strategy(section)
            .with_context(|| format!("building strategy {:?}", section.id))?;
        engine.register(strategy);
    }

    let started = std::time::Instant::now();
    let report = engine
        .run(frames, &meta)
        .context("engine run failed")?;
    let duration_secs = started.elapsed().as_secs_f64();

    info!(
        symbol,
        bars = report.bar_count,
        trades = report.trades.len(),
        rejected = report.risk_cap_rejections,
        "backtest finished"
    );

    let mut result =
        BacktestResult::from_report(report, symbol, config.backtest.initial_capital);
    result.duration_secs = duration_secs;
    Ok(result)
}
