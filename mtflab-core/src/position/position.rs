//! Position — lifecycle state for a single trade.
//!
//! Positions are created and mutated exclusively by the manager.
//! Strategies only ever see `&Position` when asked for a custom exit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1.0 for Long, -1.0 for Short.
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Why a position closed. Serialized wire values are snake_case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    /// The partial-exit ladder consumed the full position.
    PartialExit,
    TimeExit,
    StrategyExit,
    ManualExit,
    EndOfData,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
            CloseReason::PartialExit => "partial_exit",
            CloseReason::TimeExit => "time_exit",
            CloseReason::StrategyExit => "strategy_exit",
            CloseReason::ManualExit => "manual_exit",
            CloseReason::EndOfData => "end_of_data",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rung of a partial-exit ladder: close `fraction` of the *initial*
/// size when price reaches `entry + r_multiple * risk_points` (sign by
/// side).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialExitRung {
    pub fraction: f64,
    pub r_multiple: f64,
}

/// A fill that reduced (or finished) a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub size: f64,
    pub pnl: f64,
}

/// Open/closed state of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// A single trading position owned by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub strategy: String,
    pub side: PositionSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_size: f64,
    pub remaining_size: f64,
    /// Mutable price stop; None for purely time-stopped positions.
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// |entry - stop| frozen at open; rung triggers derive from this even
    /// if the stop later moves.
    pub risk_points: f64,
    /// Account-currency amount at risk at open.
    pub initial_risk: f64,
    pub point_value: f64,
    pub partial_plan: Vec<PartialExitRung>,
    /// Bitmap over `partial_plan`: rung i has fired.
    pub rungs_fired: Vec<bool>,
    /// Close the position after this many held bars, if set.
    pub time_stop_bars: Option<u32>,
    pub status: PositionStatus,
    pub close_reason: Option<CloseReason>,
    pub close_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub realized_pnl: f64,
    pub fills: Vec<Fill>,
    pub bars_held: u32,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market P&L of the remaining size at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        if !self.is_open() {
            return 0.0;
        }
        (price - self.entry_price) * self.side.sign() * self.remaining_size * self.point_value
    }

    /// Realized P&L over initial risk; 0 when risk is degenerate.
    pub fn r_multiple(&self) -> f64 {
        if self.initial_risk == 0.0 {
            return 0.0;
        }
        self.realized_pnl / self.initial_risk
    }

    /// Trigger price for a rung: `entry + r * risk_points` on the
    /// profitable side.
    pub fn rung_trigger(&self, rung: &PartialExitRung) -> f64 {
        self.entry_price + self.side.sign() * rung.r_multiple * self.risk_points
    }

    /// Realize part of the position at `price`. Size is clamped to what
    /// remains. Returns the fill's P&L.
    pub(crate) fn partial_close(
        &mut self,
        timestamp: DateTime<Utc>,
        price: f64,
        size: f64,
    ) -> f64 {
        let size = size.min(self.remaining_size);
        let pnl = (price - self.entry_price) * self.side.sign() * size * self.point_value;
        self.remaining_size -= size;
        self.realized_pnl += pnl;
        self.fills.push(Fill { timestamp, price, size, pnl });
        pnl
    }

    /// Close the whole remaining size and mark the position closed.
    pub(crate) fn close(
        &mut self,
        timestamp: DateTime<Utc>,
        price: f64,
        reason: CloseReason,
    ) {
        if self.remaining_size > 0.0 {
            self.partial_close(timestamp, price, self.remaining_size);
        }
        self.status = PositionStatus::Closed;
        self.close_reason = Some(reason);
        self.close_time = Some(timestamp);
        self.exit_price = Some(price);
    }

    /// Fraction of the initial size already closed by fired rungs.
    pub fn fired_fraction(&self) -> f64 {
        self.partial_plan
            .iter()
            .zip(&self.rungs_fired)
            .filter(|(_, &fired)| fired)
            .map(|(rung, _)| rung.fraction)
            .sum()
    }
}
