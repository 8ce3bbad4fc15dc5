//! TOML run configuration.
//!
//! One `[backtest]` section with capital and risk settings, one `[symbol]`
//! section of metadata, optional allow/block lists, and one `[[strategy]]`
//! section per registered strategy.

use chrono::{DateTime, Utc, Weekday};
use mtflab_core::domain::{SymbolMeta, SymbolRegistry};
use mtflab_core::engine::EngineConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level run configuration parsed from TOML.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    pub backtest: BacktestSection,
    pub symbol: SymbolSection,
    #[serde(default)]
    pub symbols: SymbolListSection,
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategySection>,
}

/// Capital, risk, and window settings.
#[derive(Debug, Deserialize)]
pub struct BacktestSection {
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_per_trade_risk")]
    pub per_trade_risk: f64,
    #[serde(default = "default_max_total_risk")]
    pub max_total_risk: f64,
    #[serde(default)]
    pub use_compounding: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Session-calendar minutes per year; 24x365 when absent.
    pub minutes_per_trading_year: Option<f64>,
}

/// Symbol metadata for the run.
#[derive(Debug, Deserialize)]
pub struct SymbolSection {
    pub symbol: String,
    #[serde(default = "default_asset_type")]
    pub asset_type: String,
    #[serde(default)]
    pub exchange: String,
    #[serde(default = "default_point_value")]
    pub point_value: f64,
    pub table_name: Option<String>,
}

/// Caller-owned allow/block lists.
#[derive(Debug, Default, Deserialize)]
pub struct SymbolListSection {
    #[serde(default)]
    pub allowed: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

/// One registered strategy.
#[derive(Debug, Deserialize)]
pub struct StrategySection {
    /// Registry id, e.g. "ma_crossover" or "mtf_trend".
    pub id: String,
    /// Base timeframe label for this strategy.
    pub timeframe: String,
    /// Higher timeframe for multi-timeframe strategies.
    pub higher_timeframe: Option<String>,
    /// Trading-day allowlist ("Mon", "Tue", ...); all days when absent.
    pub allowed_days: Option<Vec<String>>,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
}

fn default_capital() -> f64 {
    10_000.0
}
fn default_per_trade_risk() -> f64 {
    0.01
}
fn default_max_total_risk() -> f64 {
    0.06
}
fn default_asset_type() -> String {
    "crypto".to_string()
}
fn default_point_value() -> f64 {
    1.0
}

/// Config loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("TOML parse error: {0}")]
    Parse(String),
    #[error("unknown day-of-week {0:?}")]
    UnknownDay(String),
    #[error("unknown asset type {0:?} (expected tradfi or crypto)")]
    UnknownAssetType(String),
}

impl RunConfig {
    /// Load from a TOML file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Engine-level configuration for this run.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            initial_capital: self.backtest.initial_capital,
            max_total_risk: self.backtest.max_total_risk,
            per_trade_risk: self.backtest.per_trade_risk,
            use_compounding: self.backtest.use_compounding,
            start_time: self.backtest.start_time,
            end_time: self.backtest.end_time,
            minutes_per_trading_year: self.backtest.minutes_per_trading_year,
        }
    }

    /// Symbol metadata for this run.
    pub fn symbol_meta(&self) -> Result<SymbolMeta, ConfigError> {
        let asset_type = match self.symbol.asset_type.as_str() {
            "crypto" => mtflab_core::domain::AssetType::Crypto,
            "tradfi" => mtflab_core::domain::AssetType::Tradfi,
            other => return Err(ConfigError::UnknownAssetType(other.to_string())),
        };
        Ok(SymbolMeta {
            symbol: self.symbol.symbol.clone(),
            asset_type,
            exchange: self.symbol.exchange.clone(),
            point_value: self.symbol.point_value,
            table_name: self
                .symbol
                .table_name
                .clone()
                .unwrap_or_else(|| self.symbol.symbol.to_lowercase()),
            first_timestamp: None,
            last_timestamp: None,
        })
    }

    /// The allow/block registry declared in the config.
    pub fn symbol_registry(&self) -> SymbolRegistry {
        let mut registry = SymbolRegistry::new();
        for symbol in &self.symbols.allowed {
            registry.allow(symbol);
        }
        for symbol in &self.symbols.blocked {
            registry.block(symbol);
        }
        registry
    }
}

impl StrategySection {
    /// Parse the allowed-day labels into weekdays.
    pub fn allowed_weekdays(&self) -> Result<Option<Vec<Weekday>>, ConfigError> {
        let Some(days) = &self.allowed_days else {
            return Ok(None);
        };
        let mut parsed = Vec::with_capacity(days.len());
        for day in days {
            parsed.push(
                day.parse::<Weekday>()
                    .map_err(|_| ConfigError::UnknownDay(day.clone()))?,
            );
        }
        Ok(Some(parsed))
    }
}
