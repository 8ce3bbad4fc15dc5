//! Timeframe labels and normalization.
//!
//! Two textual conventions coexist in the wild: leading-unit ("m5", "h1",
//! the database form) and leading-number ("5m", "1h", the standard form).
//! Month uses uppercase `M` to stay distinct from minute. All conversions
//! round-trip on valid labels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minutes in a 24x365 year, the default annualization basis.
pub const MINUTES_PER_YEAR: f64 = 525_600.0;

/// Unit of a timeframe duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    fn minutes(self) -> u32 {
        match self {
            TimeUnit::Minute => 1,
            TimeUnit::Hour => 60,
            TimeUnit::Day => 1_440,
            TimeUnit::Week => 10_080,
            TimeUnit::Month => 43_200,
        }
    }

    fn letter(self) -> char {
        match self {
            TimeUnit::Minute => 'm',
            TimeUnit::Hour => 'h',
            TimeUnit::Day => 'd',
            TimeUnit::Week => 'w',
            TimeUnit::Month => 'M',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'm' => Some(TimeUnit::Minute),
            'h' => Some(TimeUnit::Hour),
            'd' => Some(TimeUnit::Day),
            'w' => Some(TimeUnit::Week),
            'M' => Some(TimeUnit::Month),
            _ => None,
        }
    }
}

/// A bar duration: unit times count ("5m" is `Minute` x 5).
///
/// Parses from either label convention; displays as the standard form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeframe {
    pub unit: TimeUnit,
    pub count: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("invalid timeframe label: {0:?}")]
    Invalid(String),
}

impl Timeframe {
    pub fn new(unit: TimeUnit, count: u32) -> Self {
        Self { unit, count }
    }

    /// Duration in minutes.
    pub fn minutes(&self) -> u32 {
        self.unit.minutes() * self.count
    }

    /// Duration as a chrono interval.
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes() as i64)
    }

    /// Standard (leading-number) label: "5m", "1h", "1M".
    pub fn standard(&self) -> String {
        format!("{}{}", self.count, self.unit.letter())
    }

    /// Database (leading-unit) label: "m5", "h1", "M1".
    pub fn db(&self) -> String {
        format!("{}{}", self.unit.letter(), self.count)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.standard())
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TimeframeError::Invalid(s.to_string());
        if s.len() < 2 {
            return Err(invalid());
        }

        let first = s.chars().next().expect("checked non-empty");
        let last = s.chars().last().expect("checked non-empty");

        // Leading-unit form: "m5", "h1".
        if let Some(unit) = TimeUnit::from_letter(first) {
            let count: u32 = s[first.len_utf8()..].parse().map_err(|_| invalid())?;
            if count == 0 {
                return Err(invalid());
            }
            return Ok(Timeframe::new(unit, count));
        }

        // Leading-number form: "5m", "1h".
        if let Some(unit) = TimeUnit::from_letter(last) {
            let count: u32 = s[..s.len() - last.len_utf8()]
                .parse()
                .map_err(|_| invalid())?;
            if count == 0 {
                return Err(invalid());
            }
            return Ok(Timeframe::new(unit, count));
        }

        Err(invalid())
    }
}

/// Convert any accepted label to its standard form ("m5" -> "5m").
pub fn to_standard(label: &str) -> Result<String, TimeframeError> {
    Ok(label.parse::<Timeframe>()?.standard())
}

/// Convert any accepted label to its database form ("5m" -> "m5").
pub fn to_db(label: &str) -> Result<String, TimeframeError> {
    Ok(label.parse::<Timeframe>()?.db())
}

/// Duration of any accepted label in minutes.
pub fn to_minutes(label: &str) -> Result<u32, TimeframeError> {
    Ok(label.parse::<Timeframe>()?.minutes())
}

/// Whether two labels denote the same duration, regardless of convention.
pub fn are_equivalent(a: &str, b: &str) -> bool {
    match (a.parse::<Timeframe>(), b.parse::<Timeframe>()) {
        (Ok(a), Ok(b)) => a.minutes() == b.minutes(),
        _ => false,
    }
}

/// Find the label in `available` equivalent to `wanted`, in whatever
/// convention `available` happens to use.
pub fn find_matching<'a>(wanted: &str, available: &'a [String]) -> Option<&'a str> {
    let wanted = wanted.parse::<Timeframe>().ok()?;
    available
        .iter()
        .find(|tf| {
            tf.parse::<Timeframe>()
                .map(|t| t.minutes() == wanted.minutes())
                .unwrap_or(false)
        })
        .map(|s| s.as_str())
}

/// Map each required label to its match in `available` (None where absent).
pub fn find_matching_all<'a>(
    required: &[String],
    available: &'a [String],
) -> Vec<(String, Option<&'a str>)> {
    required
        .iter()
        .map(|req| (req.clone(), find_matching(req, available)))
        .collect()
}

/// Resolve the column prefix actually used for `wanted` in a set of column
/// names. Aligned frames prefix higher-timeframe columns with a label and
/// an underscore; data from different sources may use either convention
/// ("m5_close" or "5m_close").
pub fn column_prefix(wanted: &str, column_names: &[String]) -> Option<String> {
    let tf = wanted.parse::<Timeframe>().ok()?;
    for prefix in [tf.db(), tf.standard()] {
        let with_sep = format!("{prefix}_");
        if column_names.iter().any(|c| c.starts_with(&with_sep)) {
            return Some(prefix);
        }
    }
    None
}
