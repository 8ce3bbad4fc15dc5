//! Multi-timeframe alignment.
//!
//! Merges one frame per timeframe into a single base-timeframe frame where
//! every row carries the most recent fully *closed* higher-timeframe bar.
//! This backward as-of join is the only mechanism preventing lookahead
//! bias: a base row never sees a higher-timeframe bar that is still open
//! at the base bar's close. A row at 08:00 sees the 07:00-08:00 1h bar,
//! never the 08:00-09:00 one.

use crate::data::frame::MarketFrame;
use crate::domain::{Timeframe, TimeframeError};
use chrono::{DateTime, Datelike, Utc, Weekday};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("no timeframes or no data supplied")]
    EmptyData,

    #[error("timeframes must be ordered by ascending duration starting at the base (got {0:?})")]
    InvalidTimeframeOrder(Vec<String>),

    #[error("no data supplied for timeframe {0:?}")]
    MissingTimeframeData(String),

    #[error(transparent)]
    Timeframe(#[from] TimeframeError),
}

/// The output of alignment: a column-oriented frame on the base timeframe.
///
/// Base columns are unprefixed (`open`, `close`, indicator names as-is);
/// higher-timeframe columns carry the source timeframe's db label and an
/// underscore (`h1_close`, `h1_ema_33`). Missing values (absent volume)
/// are NaN.
#[derive(Debug, Clone)]
pub struct AlignedFrame {
    pub base: Timeframe,
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl AlignedFrame {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Base bar open times, one per row.
    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Cheap row view over the frame at `index`.
    pub fn row(&self, index: usize) -> AlignedRow<'_> {
        debug_assert!(index < self.len());
        AlignedRow { frame: self, index }
    }
}

/// Read-only view of one aligned row, passed to strategies each bar.
#[derive(Debug, Clone, Copy)]
pub struct AlignedRow<'a> {
    frame: &'a AlignedFrame,
    index: usize,
}

impl<'a> AlignedRow<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Open time of the base bar.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.frame.timestamps[self.index]
    }

    /// Close time of the base bar; the engine's decision timestamp.
    pub fn close_time(&self) -> DateTime<Utc> {
        self.timestamp() + self.frame.base.duration()
    }

    /// Look up any column at this row. NaN values read as None.
    pub fn get(&self, name: &str) -> Option<f64> {
        let v = *self.frame.columns.get(name)?.get(self.index)?;
        if v.is_nan() {
            None
        } else {
            Some(v)
        }
    }

    fn base_col(&self, name: &str) -> f64 {
        self.frame.columns[name][self.index]
    }

    pub fn open(&self) -> f64 {
        self.base_col("open")
    }

    pub fn high(&self) -> f64 {
        self.base_col("high")
    }

    pub fn low(&self) -> f64 {
        self.base_col("low")
    }

    pub fn close(&self) -> f64 {
        self.base_col("close")
    }

    pub fn volume(&self) -> Option<f64> {
        self.get("volume")
    }

    pub fn day_of_week(&self) -> Weekday {
        self.timestamp().weekday()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame.column_names()
    }
}

/// Merge `frames` into a single aligned frame.
///
/// `timeframes` is ordered with the base (shortest) first; each label must
/// have an entry in `frames`. Higher-timeframe columns are attached by a
/// strict backward as-of join: base row at open time `t` (closing at
/// `t + d_base`) gets the last higher bar whose close time precedes the
/// base bar's close. Leading rows where some higher timeframe has no
/// closed bar yet are dropped.
pub fn align(
    frames: &BTreeMap<String, MarketFrame>,
    timeframes: &[String],
) -> Result<AlignedFrame, AlignError> {
    if timeframes.is_empty() || frames.is_empty() {
        return Err(AlignError::EmptyData);
    }

    let mut parsed: Vec<(String, Timeframe)> = Vec::with_capacity(timeframes.len());
    for label in timeframes {
        let tf: Timeframe = label.parse()?;
        parsed.push((label.clone(), tf));
    }
    for pair in parsed.windows(2) {
        if pair[1].1.minutes() <= pair[0].1.minutes() {
            return Err(AlignError::InvalidTimeframeOrder(timeframes.to_vec()));
        }
    }

    let base_label = &parsed[0].0;
    let base_tf = parsed[0].1;
    let base = frames
        .get(base_label)
        .ok_or_else(|| AlignError::MissingTimeframeData(base_label.clone()))?;
    if base.is_empty() {
        return Err(AlignError::EmptyData);
    }

    let mut higher: Vec<(&str, Timeframe, &MarketFrame)> = Vec::new();
    for (label, tf) in &parsed[1..] {
        let frame = frames
            .get(label)
            .ok_or_else(|| AlignError::MissingTimeframeData(label.clone()))?;
        higher.push((label.as_str(), *tf, frame));
    }

    // For each base row, the index of the last closed bar per higher
    // timeframe; usize::MAX marks "none yet".
    let base_bars = base.bars();
    let mut attach: Vec<Vec<usize>> = vec![Vec::with_capacity(base_bars.len()); higher.len()];
    for (h, (_, tf, frame)) in higher.iter().enumerate() {
        let bars = frame.bars();
        let mut next = 0usize;
        for base_bar in base_bars {
            let base_close = base_bar.timestamp + base_tf.duration();
            while next < bars.len() && bars[next].timestamp + tf.duration() < base_close {
                next += 1;
            }
            attach[h].push(next.checked_sub(1).unwrap_or(usize::MAX));
        }
    }

    // Drop leading rows where any higher timeframe is unresolved.
    let start = (0..base_bars.len())
        .find(|&i| attach.iter().all(|a| a[i] != usize::MAX))
        .unwrap_or(base_bars.len());

    let rows = base_bars.len() - start;
    let mut columns: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut timestamps = Vec::with_capacity(rows);

    let mut push_col = |name: String, values: Vec<f64>| {
        columns.insert(name, values);
    };

    // Base columns, unprefixed.
    push_col("open".into(), base_bars[start..].iter().map(|b| b.open).collect());
    push_col("high".into(), base_bars[start..].iter().map(|b| b.high).collect());
    push_col("low".into(), base_bars[start..].iter().map(|b| b.low).collect());
    push_col("close".into(), base_bars[start..].iter().map(|b| b.close).collect());
    push_col(
        "volume".into(),
        base_bars[start..]
            .iter()
            .map(|b| b.volume.unwrap_or(f64::NAN))
            .collect(),
    );
    for (name, values) in base.indicators() {
        push_col(name.clone(), values[start..].to_vec());
    }
    for bar in &base_bars[start..] {
        timestamps.push(bar.timestamp);
    }

    // Higher-timeframe columns, copied wholesale under the db-label prefix.
    for (h, (label, _, frame)) in higher.iter().enumerate() {
        let prefix = label
            .parse::<Timeframe>()
            .expect("validated above")
            .db();
        let bars = frame.bars();
        let picks = &attach[h][start..];

        let gather = |f: &dyn Fn(usize) -> f64| -> Vec<f64> {
            picks.iter().map(|&j| f(j)).collect()
        };

        push_col(format!("{prefix}_open"), gather(&|j| bars[j].open));
        push_col(format!("{prefix}_high"), gather(&|j| bars[j].high));
        push_col(format!("{prefix}_low"), gather(&|j| bars[j].low));
        push_col(format!("{prefix}_close"), gather(&|j| bars[j].close));
        push_col(
            format!("{prefix}_volume"),
            gather(&|j| bars[j].volume.unwrap_or(f64::NAN)),
        );
        push_col(
            format!("{prefix}_day_of_week"),
            gather(&|j| bars[j].day_of_week().num_days_from_monday() as f64),
        );
        for (name, values) in frame.indicators() {
            push_col(format!("{prefix}_{name}"), gather(&|j| values[j]));
        }
    }

    Ok(AlignedFrame { base: base_tf, timestamps, columns })
}
