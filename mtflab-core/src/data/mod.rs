//! Market data containers and multi-timeframe alignment.

pub mod align;
pub mod frame;

pub use align::{align, AlignError, AlignedFrame, AlignedRow};
pub use frame::{FrameError, MarketFrame};
