//! Equity-curve construction and drawdown accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One equity observation, appended at every bar close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySample {
    pub timestamp: DateTime<Utc>,
    /// Initial capital plus realized P&L of closed trades and fills.
    pub realized: f64,
    /// Mark-to-market P&L of open positions at this bar's close.
    pub unrealized: f64,
    /// Fractional decline from the running peak of total equity.
    pub drawdown: f64,
}

impl EquitySample {
    pub fn total(&self) -> f64 {
        self.realized + self.unrealized
    }
}

/// Tracks equity and the running peak during a run.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    initial_capital: f64,
    peak_equity: f64,
    samples: Vec<EquitySample>,
}

impl PerformanceTracker {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            peak_equity: initial_capital,
            samples: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    /// Append one sample. The peak updates first, so a new high reads as
    /// zero drawdown.
    pub fn update(&mut self, timestamp: DateTime<Utc>, realized: f64, unrealized: f64) {
        let total = realized + unrealized;
        if total > self.peak_equity {
            self.peak_equity = total;
        }
        let drawdown = if self.peak_equity > 0.0 {
            (self.peak_equity - total) / self.peak_equity
        } else {
            0.0
        };
        self.samples.push(EquitySample { timestamp, realized, unrealized, drawdown });
    }

    pub fn samples(&self) -> &[EquitySample] {
        &self.samples
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    /// Total equity at the last sample; initial capital before any.
    pub fn final_equity(&self) -> f64 {
        self.samples
            .last()
            .map(|s| s.total())
            .unwrap_or(self.initial_capital)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 8, min, 0).unwrap()
    }

    #[test]
    fn drawdown_zero_at_new_peak() {
        let mut tracker = PerformanceTracker::new(10_000.0);
        tracker.update(ts(0), 10_000.0, 500.0);
        assert_eq!(tracker.samples()[0].drawdown, 0.0);
        assert_eq!(tracker.peak_equity(), 10_500.0);
    }

    #[test]
    fn drawdown_measured_from_peak() {
        let mut tracker = PerformanceTracker::new(10_000.0);
        tracker.update(ts(0), 10_000.0, 1_000.0); // peak 11_000
        tracker.update(ts(5), 10_000.0, -100.0); // total 9_900
        let dd = tracker.samples()[1].drawdown;
        assert!((dd - (11_000.0 - 9_900.0) / 11_000.0).abs() < 1e-12);
    }

    #[test]
    fn peak_never_decreases() {
        let mut tracker = PerformanceTracker::new(10_000.0);
        tracker.update(ts(0), 12_000.0, 0.0);
        tracker.update(ts(5), 9_000.0, 0.0);
        tracker.update(ts(10), 11_000.0, 0.0);
        assert_eq!(tracker.peak_equity(), 12_000.0);
    }

    #[test]
    fn final_equity_defaults_to_initial() {
        let tracker = PerformanceTracker::new(10_000.0);
        assert_eq!(tracker.final_equity(), 10_000.0);
    }

    #[test]
    fn unrealized_contributes_to_total() {
        let mut tracker = PerformanceTracker::new(10_000.0);
        tracker.update(ts(0), 10_200.0, -150.0);
        assert_eq!(tracker.samples()[0].total(), 10_050.0);
    }
}
