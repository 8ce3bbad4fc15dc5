//! Multi-timeframe trend-following strategy.
//!
//! Higher-timeframe EMA channel decides the bias; the base timeframe
//! enters on a pullback to the slow EMA followed by a reclaim of the fast
//! EMA. The stop sits beyond the slow EMA (strategy-controlled) and the
//! target is a two-rung partial ladder. One entry per UTC day.
//!
//! Expects externally computed `ema_fast` / `ema_slow` indicator columns
//! on both input frames; the higher-timeframe pair is located through the
//! aligned frame's column prefix, whichever label convention the data
//! used.

use super::{ParamSpec, Signal, Strategy, StrategyError, StrategyMetadata, StrategyParams};
use crate::data::AlignedRow;
use crate::domain::timeframe;
use crate::position::{PartialExitRung, PositionSide, StopRule, TradePlan};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug)]
pub struct MtfTrend {
    metadata: StrategyMetadata,
    params: StrategyParams,
    higher_label: String,
    /// Column prefix of the higher timeframe, resolved on first use.
    prefix: Option<String>,
    armed_long: bool,
    armed_short: bool,
    last_entry_date: Option<NaiveDate>,
}

impl MtfTrend {
    pub fn schema() -> Vec<ParamSpec> {
        vec![
            ParamSpec::number("buffer_pct", 0.1, 0.0, 5.0, "Stop buffer beyond the slow EMA, % of price"),
            ParamSpec::number("partial_r1", 1.5, 0.1, 10.0, "First partial exit, in R"),
            ParamSpec::number("partial_r2", 4.0, 0.2, 20.0, "Second partial exit, in R"),
        ]
    }

    pub fn new(base_timeframe: &str, higher_timeframe: &str, params: StrategyParams) -> Self {
        Self {
            metadata: StrategyMetadata {
                id: "mtf_trend",
                name: "MTF Trend Follow",
                description: "Higher-timeframe EMA trend filter with base-timeframe pullback \
                              entries, EMA stop and 1.5R/4R partial ladder",
                required_timeframes: vec![
                    base_timeframe.to_string(),
                    higher_timeframe.to_string(),
                ],
                base_timeframe: base_timeframe.to_string(),
                uses_custom_sl: true,
                uses_custom_tp: true,
                params: Self::schema(),
            },
            params,
            higher_label: higher_timeframe.to_string(),
            prefix: None,
            armed_long: false,
            armed_short: false,
            last_entry_date: None,
        }
    }

    pub fn with_defaults(base_timeframe: &str, higher_timeframe: &str) -> Self {
        Self::new(
            base_timeframe,
            higher_timeframe,
            StrategyParams::defaults(&Self::schema()),
        )
    }

    fn resolve_prefix(&mut self, row: &AlignedRow<'_>) -> Option<String> {
        if self.prefix.is_none() {
            self.prefix = timeframe::column_prefix(&self.higher_label, &row.column_names());
        }
        self.prefix.clone()
    }

    fn higher(&self, row: &AlignedRow<'_>, prefix: &str, field: &str) -> Option<f64> {
        row.get(&format!("{prefix}_{field}"))
    }
}

impl Strategy for MtfTrend {
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
        let Some(prefix) = self.resolve_prefix(row) else {
            return Err(StrategyError(format!(
                "no {} columns in aligned frame",
                self.higher_label
            )));
        };

        let (Some(h_close), Some(h_fast), Some(h_slow)) = (
            self.higher(row, &prefix, "close"),
            self.higher(row, &prefix, "ema_fast"),
            self.higher(row, &prefix, "ema_slow"),
        ) else {
            return Ok(None);
        };
        let (Some(ema_fast), Some(ema_slow)) = (row.get("ema_fast"), row.get("ema_slow")) else {
            return Ok(None);
        };

        let uptrend = h_close > h_slow && h_fast > h_slow;
        let downtrend = h_close < h_slow && h_fast < h_slow;

        // Trend flip clears any armed retest.
        if !uptrend {
            self.armed_long = false;
        }
        if !downtrend {
            self.armed_short = false;
        }

        // Arm on a pullback into the slow EMA.
        if uptrend && row.low() <= ema_slow {
            self.armed_long = true;
        }
        if downtrend && row.high() >= ema_slow {
            self.armed_short = true;
        }

        if self.last_entry_date == Some(t.date_naive()) {
            return Ok(None);
        }

        let buffer = row.close() * self.params.get("buffer_pct") / 100.0;

        // Fire when price reclaims the fast EMA after the retest.
        if self.armed_long && row.close() > ema_fast {
            self.armed_long = false;
            self.last_entry_date = Some(t.date_naive());
            return Ok(Some(
                Signal::new(t, PositionSide::Long, 1.0)
                    .with_metadata("sl_price", ema_slow - buffer),
            ));
        }
        if self.armed_short && row.close() < ema_fast {
            self.armed_short = false;
            self.last_entry_date = Some(t.date_naive());
            return Ok(Some(
                Signal::new(t, PositionSide::Short, 1.0)
                    .with_metadata("sl_price", ema_slow + buffer),
            ));
        }

        Ok(None)
    }

    fn trade_plan(&self, signal: &Signal, _row: &AlignedRow<'_>) -> TradePlan {
        let stop = match signal.metadata.get("sl_price") {
            Some(&price) => StopRule::Price(price),
            // Signals always carry sl_price; a bare plan still sizes sanely.
            None => StopRule::Percent(1.0),
        };
        TradePlan {
            stop,
            target: None,
            partial_exits: vec![
                PartialExitRung { fraction: 0.5, r_multiple: self.params.get("partial_r1") },
                PartialExitRung { fraction: 0.5, r_multiple: self.params.get("partial_r2") },
            ],
        }
    }

    // Exits are fully owned by the stop and the partial ladder; the
    // default should_exit (never) is intentional.
}
