//! The bar-replay loop.
//!
//! Per bar, in order: resolve the aligned row, poll each strategy for a
//! signal (registration order; earlier registration wins risk-cap ties),
//! run the exit ladder for open positions, append one equity sample.
//! Positions open at the bar's close price; a position opened on bar `t`
//! is first exit-evaluated on the next bar.
//!
//! Strategy callbacks never unwind through this loop: a failing callback
//! is logged and read as "no signal" / "no exit".

use super::{BacktestReport, CancelToken, EngineConfig, EngineError};
use crate::data::{align, MarketFrame};
use crate::domain::{timeframe, SymbolMeta, Timeframe};
use crate::perf::{PerformanceTracker, Summary};
use crate::position::{
    CloseReason, ExitOutcome, OpenError, PositionManager, RiskPolicy, TradeRecord,
};
use crate::strategy::Strategy;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Drives one backtest over one symbol. A separate run is a separate
/// engine value; nothing is shared.
pub struct Engine {
    config: EngineConfig,
    strategies: Vec<Box<dyn Strategy>>,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            strategies: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Register a strategy. Registration order is the tie-break order for
    /// the risk cap and the evaluation order within every bar.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    /// Token for cooperative cancellation from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Union of the registered strategies' timeframe requirements,
    /// resolved against the supplied data keys and sorted by duration.
    fn resolve_timeframes(
        &self,
        frames: &BTreeMap<String, MarketFrame>,
    ) -> Result<Vec<String>, EngineError> {
        let available: Vec<String> = frames.keys().cloned().collect();

        let mut wanted: Vec<(u32, String)> = Vec::new();
        for strategy in &self.strategies {
            for label in &strategy.metadata().required_timeframes {
                let minutes = timeframe::to_minutes(label)?;
                if !wanted.iter().any(|(m, _)| *m == minutes) {
                    wanted.push((minutes, label.clone()));
                }
            }
        }
        wanted.sort_by_key(|(minutes, _)| *minutes);

        let mut resolved = Vec::with_capacity(wanted.len());
        for (_, label) in wanted {
            match timeframe::find_matching(&label, &available) {
                Some(key) => resolved.push(key.to_string()),
                None => {
                    return Err(EngineError::Align(
                        crate::data::AlignError::MissingTimeframeData(label),
                    ))
                }
            }
        }
        Ok(resolved)
    }

    /// Run the backtest to completion (or cancellation).
    pub fn run(
        &mut self,
        frames: &BTreeMap<String, MarketFrame>,
        symbol: &SymbolMeta,
    ) -> Result<BacktestReport, EngineError> {
        if self.strategies.is_empty() {
            return Err(EngineError::NoStrategies);
        }

        let timeframes = self.resolve_timeframes(frames)?;
        let aligned = align(frames, &timeframes)?;
        let base = aligned.base;

        let mut manager = PositionManager::new(RiskPolicy {
            initial_capital: self.config.initial_capital,
            max_total_risk: self.config.max_total_risk,
            per_trade_risk: self.config.per_trade_risk,
            compounding: self.config.use_compounding,
        });
        let mut tracker = PerformanceTracker::new(self.config.initial_capital);

        let point_value = symbol.point_value;
        let mut cancelled = false;
        let mut last_close: Option<(chrono::DateTime<chrono::Utc>, f64)> = None;
        let mut bar_count = 0usize;

        for i in 0..aligned.len() {
            let row = aligned.row(i);
            let t = row.close_time();

            if let Some(start) = self.config.start_time {
                if t < start {
                    continue;
                }
            }
            if let Some(end) = self.config.end_time {
                if t > end {
                    break;
                }
            }

            // Cancellation is checked between bars only.
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            bar_count += 1;
            let close = row.close();

            // ─── Signals, in registration order ───
            // Every strategy sees every bar (stateful strategies depend
            // on it); the gates below only decide whether a signal is
            // acted on. One open position per strategy at a time.
            for strategy in &mut self.strategies {
                let id = strategy.id().to_string();

                let signal = match strategy.generate_signals(&row, t) {
                    Ok(Some(signal)) => signal,
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(strategy = %id, bar = %t, error = %err, "signal callback failed");
                        continue;
                    }
                };

                if manager.has_open(&id) {
                    continue;
                }
                if !strategy.is_trading_time_allowed(&row, t) {
                    continue;
                }

                let plan = strategy.trade_plan(&signal, &row);
                let equity = self.config.initial_capital
                    + manager.realized_total()
                    + manager.unrealized_total(close);

                match manager.open_position(&id, t, close, signal.side, &plan, equity, point_value)
                {
                    Ok(_) => {}
                    Err(OpenError::RiskCapExceeded { .. }) => {
                        debug!(strategy = %id, bar = %t, "signal dropped by risk cap");
                    }
                    Err(err) => {
                        warn!(strategy = %id, bar = %t, error = %err, "signal discarded");
                    }
                }
            }

            // ─── Exit ladder per strategy, in registration order ───
            for strategy in &self.strategies {
                let id = strategy.id();
                let outcome = manager.evaluate_bar_exits(id, row.high(), row.low(), close, t);
                if let Some(ExitOutcome::StillOpen { .. }) = outcome {
                    let position = manager
                        .open_position_for(id)
                        .expect("still-open outcome implies an open position");
                    let wants_exit = match strategy.should_exit(position, &row, t) {
                        Ok(verdict) => verdict,
                        Err(err) => {
                            warn!(strategy = %id, bar = %t, error = %err, "exit callback failed");
                            false
                        }
                    };
                    if wants_exit {
                        manager.close_for_strategy(id, t, close, CloseReason::StrategyExit);
                    }
                }
            }

            // ─── One equity sample per bar ───
            let realized = self.config.initial_capital + manager.realized_total();
            let unrealized = manager.unrealized_total(close);
            tracker.update(t, realized, unrealized);

            last_close = Some((t, close));
        }

        // Cancelled runs flatten as manual exits; finished runs as
        // end-of-data. Either way the mark price is the last seen close.
        if let Some((t, close)) = last_close {
            let reason = if cancelled {
                CloseReason::ManualExit
            } else {
                CloseReason::EndOfData
            };
            manager.close_all(t, close, reason);
        }

        Ok(self.build_report(&manager, &tracker, base, bar_count, cancelled))
    }

    fn build_report(
        &self,
        manager: &PositionManager,
        tracker: &PerformanceTracker,
        base: Timeframe,
        bar_count: usize,
        cancelled: bool,
    ) -> BacktestReport {
        let trades: Vec<TradeRecord> = manager
            .closed_positions()
            .iter()
            .map(TradeRecord::from_position)
            .collect();

        let summary = Summary::compute(
            tracker.samples(),
            &trades,
            self.config.initial_capital,
            base.minutes(),
            self.config.minutes_per_trading_year,
        );

        let mut per_strategy = BTreeMap::new();
        for strategy in &self.strategies {
            let id = strategy.id();
            let own: Vec<TradeRecord> = trades
                .iter()
                .filter(|t| t.strategy == id)
                .cloned()
                .collect();
            // Scoped equity: the strategy's realized P&L accumulated at
            // each of its exits. Ratio metrics are therefore per-trade
            // rather than per-bar for the scoped view.
            let mut scoped = PerformanceTracker::new(self.config.initial_capital);
            let mut realized = self.config.initial_capital;
            for trade in &own {
                realized += trade.realized_pnl;
                scoped.update(trade.exit_time, realized, 0.0);
            }
            per_strategy.insert(
                id.to_string(),
                Summary::compute(
                    scoped.samples(),
                    &own,
                    self.config.initial_capital,
                    base.minutes(),
                    self.config.minutes_per_trading_year,
                ),
            );
        }

        BacktestReport {
            summary,
            per_strategy,
            trades,
            equity: tracker.samples().to_vec(),
            risk_cap_rejections: manager.risk_cap_rejections(),
            bar_count,
            base_timeframe: base,
            cancelled,
        }
    }
}
