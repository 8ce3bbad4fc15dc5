//! Market frames: validated, immutable OHLCV series for one symbol and
//! timeframe, plus any externally computed indicator columns.

use crate::domain::{Bar, BarError, Timeframe};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;

/// An ordered OHLCV series for one symbol + timeframe.
///
/// Indicator columns are parallel `f64` vectors keyed by name; the external
/// indicator framework computes them before the frame enters the engine.
/// Frames are validated once up front and never mutated during a run.
#[derive(Debug, Clone)]
pub struct MarketFrame {
    pub symbol: String,
    pub timeframe: Timeframe,
    bars: Vec<Bar>,
    indicators: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid bar: {0}")]
    InvalidBar(#[from] BarError),

    #[error("timestamps not strictly increasing at {timestamp}")]
    NonMonotonic { timestamp: DateTime<Utc> },

    #[error("indicator column {name:?} has {got} values, frame has {expected} bars")]
    ColumnLength {
        name: String,
        got: usize,
        expected: usize,
    },
}

impl MarketFrame {
    /// Build a frame from bars, validating every bar and timestamp order.
    pub fn from_bars(
        symbol: &str,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    ) -> Result<Self, FrameError> {
        for bar in &bars {
            bar.validate()?;
        }
        for pair in bars.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(FrameError::NonMonotonic { timestamp: pair[1].timestamp });
            }
        }
        Ok(Self {
            symbol: symbol.to_string(),
            timeframe,
            bars,
            indicators: BTreeMap::new(),
        })
    }

    /// Attach a named indicator column (one value per bar).
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self, FrameError> {
        if values.len() != self.bars.len() {
            return Err(FrameError::ColumnLength {
                name: name.to_string(),
                got: values.len(),
                expected: self.bars.len(),
            });
        }
        self.indicators.insert(name.to_string(), values);
        Ok(self)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn indicators(&self) -> &BTreeMap<String, Vec<f64>> {
        &self.indicators
    }

    /// Close time of the bar at `index` (open time + timeframe duration).
    pub fn close_time(&self, index: usize) -> DateTime<Utc> {
        self.bars[index].timestamp + self.timeframe.duration()
    }
}
