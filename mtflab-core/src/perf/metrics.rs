//! Summary metrics — pure functions over the equity log and trade list.
//!
//! Risk-adjusted ratios annualize by bar count: a base timeframe of `m`
//! minutes has `minutes_per_year / m` bars per year. The default year is
//! 24x365; a session calendar can substitute its own minute count.

use super::tracker::EquitySample;
use crate::domain::MINUTES_PER_YEAR;
use crate::position::TradeRecord;
use serde::{Deserialize, Serialize};

/// Aggregate performance statistics for one run (or one strategy's slice
/// of it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub initial_capital: f64,
    pub final_equity: f64,
    /// (final - initial) / initial, as a fraction.
    pub total_return: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    pub total_pnl: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub avg_trade: f64,
    pub max_win: f64,
    pub max_loss: f64,
    pub profit_factor: f64,

    /// Max of the equity log's drawdown column, as a fraction.
    pub max_drawdown: f64,
    /// Mean of drawdown samples strictly greater than zero.
    pub avg_drawdown: f64,

    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,

    pub avg_r_multiple: f64,
    pub expectancy: f64,

    pub avg_duration_bars: f64,
    pub max_duration_bars: u32,
}

impl Summary {
    /// Compute every metric. `base_minutes` is the base timeframe's
    /// duration; `minutes_per_year` overrides the 24x365 default when a
    /// session calendar applies.
    pub fn compute(
        samples: &[EquitySample],
        trades: &[TradeRecord],
        initial_capital: f64,
        base_minutes: u32,
        minutes_per_year: Option<f64>,
    ) -> Self {
        let periods_per_year =
            minutes_per_year.unwrap_or(MINUTES_PER_YEAR) / base_minutes.max(1) as f64;
        let final_equity = samples
            .last()
            .map(|s| s.total())
            .unwrap_or(initial_capital);
        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.realized_pnl > 0.0)
            .map(|t| t.realized_pnl)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| t.realized_pnl < 0.0)
            .map(|t| t.realized_pnl)
            .collect();

        let total_pnl: f64 = trades.iter().map(|t| t.realized_pnl).sum();
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins.len() as f64 / trades.len() as f64
        };
        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);

        let max_dd = max_drawdown(samples);
        let returns = bar_returns(samples);
        let durations: Vec<u32> = trades.iter().map(|t| t.duration_bars).collect();

        Self {
            initial_capital,
            final_equity,
            total_return,
            total_trades: trades.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            total_pnl,
            avg_win,
            avg_loss,
            avg_trade: if trades.is_empty() {
                0.0
            } else {
                total_pnl / trades.len() as f64
            },
            max_win: wins.iter().copied().fold(0.0, f64::max),
            max_loss: losses.iter().copied().fold(0.0, f64::min),
            profit_factor: profit_factor(trades),
            max_drawdown: max_dd,
            avg_drawdown: avg_drawdown(samples),
            sharpe: sharpe(&returns, periods_per_year),
            sortino: sortino(&returns, periods_per_year),
            calmar: if max_dd > 0.0 { total_return / max_dd } else { 0.0 },
            avg_r_multiple: mean(
                &trades.iter().map(|t| t.r_multiple).collect::<Vec<f64>>(),
            ),
            expectancy: win_rate * avg_win - (1.0 - win_rate) * avg_loss.abs(),
            avg_duration_bars: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<u32>() as f64 / durations.len() as f64
            },
            max_duration_bars: durations.iter().copied().max().unwrap_or(0),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Gross profits over gross losses; infinite when nothing was lost.
pub fn profit_factor(trades: &[TradeRecord]) -> f64 {
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.realized_pnl > 0.0)
        .map(|t| t.realized_pnl)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.realized_pnl < 0.0)
        .map(|t| t.realized_pnl.abs())
        .sum();

    if gross_loss == 0.0 {
        return if gross_profit > 0.0 { f64::INFINITY } else { 0.0 };
    }
    gross_profit / gross_loss
}

/// Largest drawdown in the equity log, as a positive fraction.
pub fn max_drawdown(samples: &[EquitySample]) -> f64 {
    samples.iter().map(|s| s.drawdown).fold(0.0, f64::max)
}

/// Mean of the drawdown samples strictly greater than zero.
pub fn avg_drawdown(samples: &[EquitySample]) -> f64 {
    let in_dd: Vec<f64> = samples
        .iter()
        .map(|s| s.drawdown)
        .filter(|&d| d > 0.0)
        .collect();
    mean(&in_dd)
}

/// Annualized Sharpe over bar returns of total equity.
pub fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let sd = std_dev(returns);
    if sd < 1e-15 {
        return 0.0;
    }
    (m / sd) * periods_per_year.sqrt()
}

/// Sortino: like Sharpe, but the divisor only sees negative returns.
/// Infinite when the curve never went down.
pub fn sortino(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
    if downside.is_empty() {
        return f64::INFINITY;
    }
    let downside_var =
        downside.iter().map(|r| r * r).sum::<f64>() / downside.len() as f64;
    let downside_std = downside_var.sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    (mean(returns) / downside_std) * periods_per_year.sqrt()
}

/// Per-bar fractional returns of total (realized + unrealized) equity.
pub fn bar_returns(samples: &[EquitySample]) -> Vec<f64> {
    samples
        .windows(2)
        .map(|w| {
            let prev = w[0].total();
            if prev > 0.0 {
                (w[1].total() - prev) / prev
            } else {
                0.0
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{CloseReason, PositionSide};
    use chrono::{TimeZone, Utc};

    fn trade(pnl: f64, risk: f64, bars: u32) -> TradeRecord {
        let t = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        TradeRecord {
            strategy: "test".into(),
            side: PositionSide::Long,
            entry_time: t,
            entry_price: 100.0,
            exit_time: t + chrono::Duration::minutes(5 * bars as i64),
            exit_price: 100.0 + pnl,
            initial_size: 1.0,
            initial_risk: risk,
            realized_pnl: pnl,
            r_multiple: if risk > 0.0 { pnl / risk } else { 0.0 },
            close_reason: CloseReason::StrategyExit,
            duration_bars: bars,
        }
    }

    fn samples_from_totals(totals: &[f64]) -> Vec<EquitySample> {
        let mut tracker = super::super::tracker::PerformanceTracker::new(totals[0]);
        for (i, &total) in totals.iter().enumerate() {
            let t = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap()
                + chrono::Duration::minutes(5 * i as i64);
            tracker.update(t, total, 0.0);
        }
        tracker.samples().to_vec()
    }

    // ── Profit factor ──

    #[test]
    fn profit_factor_mixed() {
        let trades = vec![trade(500.0, 100.0, 3), trade(-200.0, 100.0, 2), trade(300.0, 100.0, 5)];
        assert!((profit_factor(&trades) - 4.0).abs() < 1e-10);
    }

    #[test]
    fn profit_factor_no_losers_is_infinite() {
        let trades = vec![trade(500.0, 100.0, 3)];
        assert!(profit_factor(&trades).is_infinite());
    }

    #[test]
    fn profit_factor_no_trades_is_zero() {
        assert_eq!(profit_factor(&[]), 0.0);
    }

    // ── Drawdown ──

    #[test]
    fn max_and_avg_drawdown() {
        let samples = samples_from_totals(&[100_000.0, 110_000.0, 99_000.0, 104_500.0]);
        let max_dd = max_drawdown(&samples);
        assert!((max_dd - (110_000.0 - 99_000.0) / 110_000.0).abs() < 1e-12);

        // Two samples in drawdown: 10% and 5%.
        let avg = avg_drawdown(&samples);
        assert!((avg - 0.075).abs() < 1e-12);
    }

    #[test]
    fn monotonic_curve_has_zero_drawdown() {
        let samples = samples_from_totals(&[100.0, 101.0, 102.0, 103.0]);
        assert_eq!(max_drawdown(&samples), 0.0);
        assert_eq!(avg_drawdown(&samples), 0.0);
    }

    // ── Sharpe / Sortino ──

    #[test]
    fn sharpe_zero_for_constant_curve() {
        let samples = samples_from_totals(&[100.0; 20]);
        let returns = bar_returns(&samples);
        assert_eq!(sharpe(&returns, 105_120.0), 0.0);
    }

    #[test]
    fn sharpe_positive_for_upward_noise() {
        let totals: Vec<f64> = (0..60)
            .map(|i| 100_000.0 * (1.0 + 0.001 * i as f64 + if i % 2 == 0 { 0.0005 } else { 0.0 }))
            .collect();
        let returns = bar_returns(&samples_from_totals(&totals));
        assert!(sharpe(&returns, 105_120.0) > 0.0);
    }

    #[test]
    fn sortino_infinite_without_downside() {
        let samples = samples_from_totals(&[100.0, 101.0, 102.0, 104.0]);
        let returns = bar_returns(&samples);
        assert!(sortino(&returns, 105_120.0).is_infinite());
    }

    #[test]
    fn sortino_finite_with_downside() {
        let samples = samples_from_totals(&[100.0, 102.0, 101.0, 103.0, 102.0, 105.0]);
        let returns = bar_returns(&samples);
        let s = sortino(&returns, 105_120.0);
        assert!(s.is_finite() && s > 0.0);
    }

    // ── Aggregate ──

    #[test]
    fn summary_basic_shape() {
        let samples = samples_from_totals(&[10_000.0, 10_100.0, 10_050.0, 10_200.0]);
        let trades = vec![trade(100.0, 50.0, 2), trade(-50.0, 50.0, 1), trade(150.0, 50.0, 4)];
        let summary = Summary::compute(&samples, &trades, 10_000.0, 5, None);

        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.winning_trades, 2);
        assert_eq!(summary.losing_trades, 1);
        assert!((summary.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((summary.total_return - 0.02).abs() < 1e-12);
        assert!((summary.total_pnl - 200.0).abs() < 1e-12);
        assert!((summary.avg_win - 125.0).abs() < 1e-12);
        assert!((summary.avg_loss - (-50.0)).abs() < 1e-12);
        assert_eq!(summary.max_duration_bars, 4);
        assert!((summary.avg_duration_bars - 7.0 / 3.0).abs() < 1e-12);
        // avg r: (2 - 1 + 3) / 3
        assert!((summary.avg_r_multiple - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn expectancy_formula() {
        let trades = vec![trade(100.0, 50.0, 1), trade(-60.0, 50.0, 1)];
        let samples = samples_from_totals(&[10_000.0, 10_040.0]);
        let summary = Summary::compute(&samples, &trades, 10_000.0, 5, None);
        // 0.5 * 100 - 0.5 * 60 = 20
        assert!((summary.expectancy - 20.0).abs() < 1e-12);
    }

    #[test]
    fn calmar_zero_without_drawdown() {
        let samples = samples_from_totals(&[10_000.0, 10_100.0, 10_200.0]);
        let summary = Summary::compute(&samples, &[], 10_000.0, 5, None);
        assert_eq!(summary.calmar, 0.0);
    }

    #[test]
    fn session_calendar_changes_annualization() {
        let totals: Vec<f64> = (0..50)
            .map(|i| 10_000.0 * (1.0 + 0.001 * i as f64 + if i % 3 == 0 { -0.0006 } else { 0.0 }))
            .collect();
        let samples = samples_from_totals(&totals);
        let crypto = Summary::compute(&samples, &[], 10_000.0, 5, None);
        // A trading year of 252 * 390 minutes has fewer 5m bars.
        let tradfi = Summary::compute(&samples, &[], 10_000.0, 5, Some(252.0 * 390.0));
        assert!(crypto.sharpe.abs() > tradfi.sharpe.abs());
    }

    #[test]
    fn empty_inputs_are_all_finite_or_zero() {
        let summary = Summary::compute(&[], &[], 10_000.0, 5, None);
        assert_eq!(summary.total_trades, 0);
        assert_eq!(summary.total_return, 0.0);
        assert_eq!(summary.win_rate, 0.0);
        assert_eq!(summary.sharpe, 0.0);
        assert_eq!(summary.max_drawdown, 0.0);
        assert_eq!(summary.final_equity, 10_000.0);
    }
}
