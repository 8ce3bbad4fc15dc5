//! Position manager — sizing, SL/TP derivation, the account-wide risk
//! cap, and the per-bar exit ladder.
//!
//! The manager is the sole mutator of positions. Opening is atomic: a
//! denied open leaves no trace beyond the rejection counter.

use super::position::{CloseReason, PartialExitRung, Position, PositionSide, PositionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stop-loss derivation declared by a strategy for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StopRule {
    /// Stop at `entry -/+ pct%` of the entry price.
    Percent(f64),
    /// Absolute stop price (strategy-controlled).
    Price(f64),
    /// No price stop; exit after N bars. Sizing uses a default 1% stop
    /// distance, matching the reference implementation.
    TimeBars(u32),
}

/// Take-profit derivation declared by a strategy for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TargetRule {
    /// Target at `entry +/- pct%` of the entry price.
    Percent(f64),
    /// Absolute target price (strategy-controlled).
    Price(f64),
    /// Target at `rr` times the initial risk distance from entry.
    RiskReward(f64),
}

/// How one entry wants its stop, target, and partial exits derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub stop: StopRule,
    pub target: Option<TargetRule>,
    pub partial_exits: Vec<PartialExitRung>,
}

impl TradePlan {
    /// Percent stop with an R:R target, the most common shape.
    pub fn percent_stop_rr(sl_percent: f64, tp_rr: f64) -> Self {
        Self {
            stop: StopRule::Percent(sl_percent),
            target: Some(TargetRule::RiskReward(tp_rr)),
            partial_exits: Vec::new(),
        }
    }

    pub fn with_partial_exits(mut self, rungs: Vec<PartialExitRung>) -> Self {
        self.partial_exits = rungs;
        self
    }
}

/// Account-wide risk limits for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub initial_capital: f64,
    /// Cap on the summed initial risk of all open positions, as a
    /// fraction of effective capital.
    pub max_total_risk: f64,
    /// Risk per trade as a fraction of effective capital.
    pub per_trade_risk: f64,
    /// When true, risk fractions apply to current equity instead of
    /// initial capital.
    pub compounding: bool,
}

impl RiskPolicy {
    pub fn effective_capital(&self, equity: f64) -> f64 {
        if self.compounding {
            equity
        } else {
            self.initial_capital
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum OpenError {
    /// Stop coincides with (or is on the wrong side of) the entry; no
    /// risk distance to size against.
    #[error("invalid stop for {side} entry at {entry}: {stop:?}")]
    InvalidStop {
        side: PositionSide,
        entry: f64,
        stop: Option<f64>,
    },

    /// Target on the wrong side of entry, or partial fractions malformed.
    #[error("invalid trade plan: {0}")]
    InvalidPlan(String),

    /// Opening would push total open risk past the account cap. Not a
    /// fault: the signal is dropped and counted.
    #[error("risk cap exceeded: open {open_risk:.2} + new {new_risk:.2} vs cap {cap:.2}")]
    RiskCapExceeded {
        open_risk: f64,
        new_risk: f64,
        cap: f64,
    },
}

/// What the per-bar exit ladder did to a position.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    /// Position survives the bar (possibly after partial fills).
    StillOpen { rungs_fired: usize },
    /// Position fully closed this bar.
    Closed { reason: CloseReason },
}

/// Owns every position in a run.
#[derive(Debug)]
pub struct PositionManager {
    policy: RiskPolicy,
    open: Vec<Position>,
    closed: Vec<Position>,
    next_id: u64,
    risk_cap_rejections: u64,
}

impl PositionManager {
    pub fn new(policy: RiskPolicy) -> Self {
        Self {
            policy,
            open: Vec::new(),
            closed: Vec::new(),
            next_id: 1,
            risk_cap_rejections: 0,
        }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Summed initial risk of all open positions, in account currency.
    pub fn open_risk_total(&self) -> f64 {
        self.open.iter().map(|p| p.initial_risk).sum()
    }

    pub fn risk_cap_rejections(&self) -> u64 {
        self.risk_cap_rejections
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    pub fn open_position_for(&self, strategy: &str) -> Option<&Position> {
        self.open.iter().find(|p| p.strategy == strategy)
    }

    pub fn has_open(&self, strategy: &str) -> bool {
        self.open_position_for(strategy).is_some()
    }

    /// Open a position at `entry_price`, deriving stop/target/size from
    /// the plan. `equity` is the current total equity, used when
    /// compounding is on. Denial mutates nothing but the rejection
    /// counter.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &mut self,
        strategy: &str,
        t: DateTime<Utc>,
        entry_price: f64,
        side: PositionSide,
        plan: &TradePlan,
        equity: f64,
        point_value: f64,
    ) -> Result<u64, OpenError> {
        let (stop_loss, sizing_distance, time_stop_bars) =
            derive_stop(entry_price, side, &plan.stop)?;
        validate_partials(&plan.partial_exits)?;

        if !(sizing_distance.is_finite() && sizing_distance > 0.0) {
            return Err(OpenError::InvalidStop { side, entry: entry_price, stop: stop_loss });
        }

        let take_profit = match &plan.target {
            Some(rule) => Some(derive_target(entry_price, side, sizing_distance, rule)?),
            None => None,
        };

        let k_eff = self.policy.effective_capital(equity);
        let risk_amount = self.policy.per_trade_risk * k_eff;
        let size = risk_amount / (sizing_distance * point_value);

        // Risk cap: the candidate's own risk counts. The cap is exclusive;
        // reaching it exactly denies the open (see DESIGN.md).
        let cap = self.policy.max_total_risk * k_eff;
        let open_risk = self.open_risk_total();
        if open_risk + risk_amount >= cap {
            self.risk_cap_rejections += 1;
            return Err(OpenError::RiskCapExceeded {
                open_risk,
                new_risk: risk_amount,
                cap,
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        let rung_count = plan.partial_exits.len();
        self.open.push(Position {
            id,
            strategy: strategy.to_string(),
            side,
            entry_time: t,
            entry_price,
            initial_size: size,
            remaining_size: size,
            stop_loss,
            take_profit,
            risk_points: sizing_distance,
            initial_risk: risk_amount,
            point_value,
            partial_plan: plan.partial_exits.clone(),
            rungs_fired: vec![false; rung_count],
            time_stop_bars,
            status: PositionStatus::Open,
            close_reason: None,
            close_time: None,
            exit_price: None,
            realized_pnl: 0.0,
            fills: Vec::new(),
            bars_held: 0,
        });
        Ok(id)
    }

    /// Run the price/time exit ladder for `strategy`'s open position over
    /// one bar. Checks, in order: stop loss at the pessimistic extreme,
    /// partial rungs in ascending r, take profit, time stop. Returns None
    /// when the strategy has no position entered before `t`.
    ///
    /// The strategy's own `should_exit` hook runs after this, driven by
    /// the engine; see [`PositionManager::close_for_strategy`].
    pub fn evaluate_bar_exits(
        &mut self,
        strategy: &str,
        high: f64,
        low: f64,
        close: f64,
        t: DateTime<Utc>,
    ) -> Option<ExitOutcome> {
        let idx = self
            .open
            .iter()
            .position(|p| p.strategy == strategy && p.entry_time < t)?;

        let outcome = {
            let pos = &mut self.open[idx];
            pos.bars_held += 1;
            run_exit_ladder(pos, high, low, close, t)
        };

        if matches!(outcome, ExitOutcome::Closed { .. }) {
            let pos = self.open.remove(idx);
            self.closed.push(pos);
        }
        Some(outcome)
    }

    /// Close a strategy's open position at `price` (strategy exit, manual
    /// cancel, end of data).
    pub fn close_for_strategy(
        &mut self,
        strategy: &str,
        t: DateTime<Utc>,
        price: f64,
        reason: CloseReason,
    ) -> bool {
        let Some(idx) = self.open.iter().position(|p| p.strategy == strategy) else {
            return false;
        };
        let mut pos = self.open.remove(idx);
        pos.close(t, price, reason);
        self.closed.push(pos);
        true
    }

    /// Force-close every open position at `price` (cancellation, end of
    /// data).
    pub fn close_all(&mut self, t: DateTime<Utc>, price: f64, reason: CloseReason) {
        for mut pos in self.open.drain(..) {
            pos.close(t, price, reason);
            self.closed.push(pos);
        }
    }

    /// Mark-to-market P&L over all open positions at `price`.
    pub fn unrealized_total(&self, price: f64) -> f64 {
        self.open.iter().map(|p| p.unrealized_pnl(price)).sum()
    }

    /// Realized P&L accumulated across closed and open positions.
    pub fn realized_total(&self) -> f64 {
        self.closed.iter().map(|p| p.realized_pnl).sum::<f64>()
            + self.open.iter().map(|p| p.realized_pnl).sum::<f64>()
    }
}

fn derive_stop(
    entry: f64,
    side: PositionSide,
    rule: &StopRule,
) -> Result<(Option<f64>, f64, Option<u32>), OpenError> {
    // Sizing distance used when no price stop exists.
    const TIME_STOP_SIZING_PCT: f64 = 1.0;

    match *rule {
        StopRule::Percent(pct) => {
            if !(pct.is_finite() && pct > 0.0) {
                return Err(OpenError::InvalidStop { side, entry, stop: None });
            }
            let stop = entry * (1.0 - side.sign() * pct / 100.0);
            Ok((Some(stop), (entry - stop).abs(), None))
        }
        StopRule::Price(stop) => {
            // Stop must sit on the losing side of entry, strictly.
            let valid = match side {
                PositionSide::Long => stop < entry,
                PositionSide::Short => stop > entry,
            };
            if !valid {
                return Err(OpenError::InvalidStop { side, entry, stop: Some(stop) });
            }
            Ok((Some(stop), (entry - stop).abs(), None))
        }
        StopRule::TimeBars(bars) => {
            if bars == 0 {
                return Err(OpenError::InvalidPlan("time stop of zero bars".into()));
            }
            Ok((None, entry * TIME_STOP_SIZING_PCT / 100.0, Some(bars)))
        }
    }
}

fn derive_target(
    entry: f64,
    side: PositionSide,
    risk_points: f64,
    rule: &TargetRule,
) -> Result<f64, OpenError> {
    let tp = match *rule {
        TargetRule::Percent(pct) => entry * (1.0 + side.sign() * pct / 100.0),
        TargetRule::Price(price) => price,
        TargetRule::RiskReward(rr) => entry + side.sign() * rr * risk_points,
    };
    let valid = match side {
        PositionSide::Long => tp > entry,
        PositionSide::Short => tp < entry,
    };
    if !valid {
        return Err(OpenError::InvalidPlan(format!(
            "target {tp} not on the profitable side of {side} entry {entry}"
        )));
    }
    Ok(tp)
}

fn validate_partials(rungs: &[PartialExitRung]) -> Result<(), OpenError> {
    let mut total = 0.0;
    let mut last_r = f64::NEG_INFINITY;
    for rung in rungs {
        if !(rung.fraction > 0.0 && rung.fraction <= 1.0) {
            return Err(OpenError::InvalidPlan(format!(
                "partial fraction {} out of (0, 1]",
                rung.fraction
            )));
        }
        if rung.r_multiple <= 0.0 {
            return Err(OpenError::InvalidPlan(format!(
                "partial r-multiple {} must be positive",
                rung.r_multiple
            )));
        }
        if rung.r_multiple <= last_r {
            return Err(OpenError::InvalidPlan(
                "partial rungs must have strictly ascending r-multiples".into(),
            ));
        }
        last_r = rung.r_multiple;
        total += rung.fraction;
    }
    if total > 1.0 + 1e-9 {
        return Err(OpenError::InvalidPlan(format!(
            "partial fractions sum to {total}, must be <= 1"
        )));
    }
    Ok(())
}

/// Steps 1-4 of the per-bar exit ladder (the strategy hook is step 5,
/// engine-driven). Stops win any tie with a rung or target inside the
/// same bar; a gap through the stop still fills at the stop price.
fn run_exit_ladder(
    pos: &mut Position,
    high: f64,
    low: f64,
    close: f64,
    t: DateTime<Utc>,
) -> ExitOutcome {
    // 1. Stop loss at the pessimistic extreme.
    if let Some(stop) = pos.stop_loss {
        let hit = match pos.side {
            PositionSide::Long => low <= stop,
            PositionSide::Short => high >= stop,
        };
        if hit {
            pos.close(t, stop, CloseReason::StopLoss);
            return ExitOutcome::Closed { reason: CloseReason::StopLoss };
        }
    }

    // 2. Partial rungs, ascending r. Several may fire in one bar.
    let mut rungs_fired = 0;
    for i in 0..pos.partial_plan.len() {
        if pos.rungs_fired[i] {
            continue;
        }
        let rung = pos.partial_plan[i];
        let trigger = pos.rung_trigger(&rung);
        let reached = match pos.side {
            PositionSide::Long => high >= trigger,
            PositionSide::Short => low <= trigger,
        };
        if !reached {
            break;
        }
        pos.rungs_fired[i] = true;
        rungs_fired += 1;
        pos.partial_close(t, trigger, rung.fraction * pos.initial_size);

        if pos.fired_fraction() >= 1.0 - 1e-9 || pos.remaining_size <= 0.0 {
            // Ladder consumed the whole position; any float residue
            // closes at the final trigger so sizes conserve exactly.
            pos.close(t, trigger, CloseReason::PartialExit);
            return ExitOutcome::Closed { reason: CloseReason::PartialExit };
        }
    }

    // 3. Take profit.
    if let Some(tp) = pos.take_profit {
        let hit = match pos.side {
            PositionSide::Long => high >= tp,
            PositionSide::Short => low <= tp,
        };
        if hit {
            pos.close(t, tp, CloseReason::TakeProfit);
            return ExitOutcome::Closed { reason: CloseReason::TakeProfit };
        }
    }

    // 4. Time stop.
    if let Some(max_bars) = pos.time_stop_bars {
        if pos.bars_held >= max_bars {
            pos.close(t, close, CloseReason::TimeExit);
            return ExitOutcome::Closed { reason: CloseReason::TimeExit };
        }
    }

    ExitOutcome::StillOpen { rungs_fired }
}

/// A closed position flattened for reporting and CSV export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub strategy: String,
    pub side: PositionSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub initial_size: f64,
    pub initial_risk: f64,
    pub realized_pnl: f64,
    pub r_multiple: f64,
    pub close_reason: CloseReason,
    pub duration_bars: u32,
}

impl TradeRecord {
    /// Flatten a closed position. Panics in debug builds on open input.
    pub fn from_position(pos: &Position) -> Self {
        debug_assert!(!pos.is_open(), "trade records only exist for closed positions");
        Self {
            strategy: pos.strategy.clone(),
            side: pos.side,
            entry_time: pos.entry_time,
            entry_price: pos.entry_price,
            exit_time: pos.close_time.unwrap_or(pos.entry_time),
            exit_price: pos.exit_price.unwrap_or(pos.entry_price),
            initial_size: pos.initial_size,
            initial_risk: pos.initial_risk,
            realized_pnl: pos.realized_pnl,
            r_multiple: pos.r_multiple(),
            close_reason: pos.close_reason.unwrap_or(CloseReason::ManualExit),
            duration_bars: pos.bars_held,
        }
    }

    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }
}
