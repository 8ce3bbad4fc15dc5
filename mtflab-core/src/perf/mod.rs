//! Performance tracking: equity samples, drawdowns, summary metrics.

pub mod metrics;
pub mod tracker;

pub use metrics::Summary;
pub use tracker::{EquitySample, PerformanceTracker};
