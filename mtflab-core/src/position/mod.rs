//! Position lifecycle, sizing, and the account-wide risk cap.

pub mod manager;
pub mod position;

pub use manager::{
    ExitOutcome, OpenError, PositionManager, RiskPolicy, StopRule, TargetRule, TradePlan,
    TradeRecord,
};
pub use position::{
    CloseReason, Fill, PartialExitRung, Position, PositionSide, PositionStatus,
};
