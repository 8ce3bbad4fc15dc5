//! Moving-average crossover strategy, single timeframe.
//!
//! Long when the fast MA crosses above the slow MA, short on the opposite
//! cross; exits on the reverse cross. Stops are percent-based with an
//! R:R-derived target.

use super::{ParamSpec, Signal, Strategy, StrategyError, StrategyMetadata, StrategyParams};
use crate::data::AlignedRow;
use crate::position::{Position, PositionSide, TradePlan};
use chrono::{DateTime, Utc};

#[derive(Debug)]
pub struct MaCrossover {
    metadata: StrategyMetadata,
    params: StrategyParams,
    closes: Vec<f64>,
}

impl MaCrossover {
    pub fn schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec::number("fast_period", 20.0, 2.0, 200.0, "Fast MA period"),
            ParamSpec::number("slow_period", 50.0, 5.0, 400.0, "Slow MA period"),
            ParamSpec::number("sl_percent", 2.0, 0.1, 20.0, "Stop distance, % of entry"),
            ParamSpec::number("tp_rr", 2.0, 0.5, 10.0, "Target as a multiple of risk"),
        ]
    }

    pub fn new(base_timeframe: &str, params: StrategyParams) -> Self {
        Self {
            metadata: StrategyMetadata {
                id: "ma_crossover",
                name: "MA Crossover",
                description: "Fast/slow moving-average crossover with percent stop and R:R target",
                required_timeframes: vec![base_timeframe.to_string()],
                base_timeframe: base_timeframe.to_string(),
                uses_custom_sl: false,
                uses_custom_tp: false,
                params: Self::schema(),
            },
            params,
            closes: Vec::new(),
        }
    }

    pub fn with_defaults(base_timeframe: &str) -> Self {
        Self::new(base_timeframe, StrategyParams::defaults(&Self::schema()))
    }

    /// Mean of the last `period` closes ending at `end` (exclusive).
    fn sma(&self, period: usize, end: usize) -> Option<f64> {
        if period == 0 || end < period {
            return None;
        }
        let window = &self.closes[end - period..end];
        Some(window.iter().sum::<f64>() / period as f64)
    }
}

impl Strategy for MaCrossover {
    fn metadata(&self) -> &StrategyMetadata {
        &self.metadata
    }

    fn params(&self) -> &StrategyParams {
        &self.params
    }

    fn generate_signals(
        &mut self,
        row: &AlignedRow<'_>,
        t: DateTime<Utc>,
    ) -> Result<Option<Signal>, StrategyError> {
        self.closes.push(row.close());
        let n = self.closes.len();

        let fast_period = self.params.get_usize("fast_period");
        let slow_period = self.params.get_usize("slow_period");

        let (Some(fast), Some(slow)) = (self.sma(fast_period, n), self.sma(slow_period, n)) else {
            return Ok(None);
        };
        let (Some(fast_prev), Some(slow_prev)) =
            (self.sma(fast_period, n - 1), self.sma(slow_period, n - 1))
        else {
            return Ok(None);
        };

        let signal = if fast_prev <= slow_prev && fast > slow {
            Some(
                Signal::new(t, PositionSide::Long, 1.0)
                    .with_metadata("fast_ma", fast)
                    .with_metadata("slow_ma", slow),
            )
        } else if fast_prev >= slow_prev && fast < slow {
            Some(
                Signal::new(t, PositionSide::Short, 1.0)
                    .with_metadata("fast_ma", fast)
                    .with_metadata("slow_ma", slow),
            )
        } else {
            None
        };
        Ok(signal)
    }

    fn trade_plan(&self, _signal: &Signal, _row: &AlignedRow<'_>) -> TradePlan {
        TradePlan::percent_stop_rr(self.params.get("sl_percent"), self.params.get("tp_rr"))
    }

    fn should_exit(
        &self,
        position: &Position,
        _row: &AlignedRow<'_>,
        _t: DateTime<Utc>,
    ) -> Result<bool, StrategyError> {
        let n = self.closes.len();
        let fast = self.sma(self.params.get_usize("fast_period"), n);
        let slow = self.sma(self.params.get_usize("slow_period"), n);
        let (Some(fast), Some(slow)) = (fast, slow) else {
            return Ok(false);
        };
        Ok(match position.side {
            PositionSide::Long => fast < slow,
            PositionSide::Short => fast > slow,
        })
    }
}
