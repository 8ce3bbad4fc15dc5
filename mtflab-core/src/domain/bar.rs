use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Single OHLCV bar. The timestamp is the bar's open time (UTC); a bar of
/// timeframe `d` closes at `timestamp + d`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume may be absent in some data sources (e.g. forex feeds).
    pub volume: Option<f64>,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: Option<f64>,
    ) -> Self {
        Self { timestamp, open, high, low, close, volume }
    }

    /// Validate bar invariants: `low <= open, close <= high`.
    pub fn validate(&self) -> Result<(), BarError> {
        if self.high < self.low {
            return Err(BarError::InvertedRange {
                timestamp: self.timestamp,
                high: self.high,
                low: self.low,
            });
        }
        if !(self.low..=self.high).contains(&self.open) {
            return Err(BarError::OpenOutOfRange { timestamp: self.timestamp });
        }
        if !(self.low..=self.high).contains(&self.close) {
            return Err(BarError::CloseOutOfRange { timestamp: self.timestamp });
        }
        Ok(())
    }

    /// Day of week of the bar's open time.
    pub fn day_of_week(&self) -> Weekday {
        self.timestamp.weekday()
    }

    /// Bar range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Error)]
pub enum BarError {
    #[error("inverted bar range at {timestamp}: high={high}, low={low}")]
    InvertedRange {
        timestamp: DateTime<Utc>,
        high: f64,
        low: f64,
    },

    #[error("open price outside high/low range at {timestamp}")]
    OpenOutOfRange { timestamp: DateTime<Utc> },

    #[error("close price outside high/low range at {timestamp}")]
    CloseOutOfRange { timestamp: DateTime<Utc> },
}
