//! Symbol metadata and the allow/block registry.
//!
//! The registry is an explicit value handed to the run configuration by the
//! caller; nothing here is process-global.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Broad market class of a symbol, used to pick an annualization calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Tradfi,
    Crypto,
}

/// Per-symbol metadata supplied by the external data layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMeta {
    pub symbol: String,
    pub asset_type: AssetType,
    pub exchange: String,
    /// Account currency per point of price movement per unit of size.
    /// Crypto pairs are 1.0 per coin; forex micro-lots are e.g. 0.1.
    #[serde(default = "default_point_value")]
    pub point_value: f64,
    pub table_name: String,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
}

fn default_point_value() -> f64 {
    1.0
}

impl SymbolMeta {
    /// Minimal metadata for a crypto symbol with unit point value.
    pub fn crypto(symbol: &str, exchange: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_type: AssetType::Crypto,
            exchange: exchange.to_string(),
            point_value: 1.0,
            table_name: symbol.to_lowercase(),
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    pub fn with_point_value(mut self, point_value: f64) -> Self {
        self.point_value = point_value;
        self
    }
}

/// Allow/block list for symbols, owned by the caller and passed into the
/// run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolRegistry {
    allowed: BTreeSet<String>,
    blocked: BTreeSet<String>,
}

impl SymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, symbol: &str) {
        self.blocked.remove(symbol);
        self.allowed.insert(symbol.to_string());
    }

    pub fn block(&mut self, symbol: &str) {
        self.allowed.remove(symbol);
        self.blocked.insert(symbol.to_string());
    }

    /// A symbol is active when it is not blocked and either the allow list
    /// is empty (everything allowed by default) or it is on it.
    pub fn is_active(&self, symbol: &str) -> bool {
        if self.blocked.contains(symbol) {
            return false;
        }
        self.allowed.is_empty() || self.allowed.contains(symbol)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_value_defaults_to_one() {
        let meta = SymbolMeta::crypto("BTCUSDT", "binance");
        assert_eq!(meta.point_value, 1.0);
        let micro = meta.with_point_value(0.1);
        assert_eq!(micro.point_value, 0.1);
    }

    #[test]
    fn empty_registry_allows_everything() {
        let reg = SymbolRegistry::new();
        assert!(reg.is_active("BTCUSDT"));
        assert!(reg.is_active("eurusd"));
    }

    #[test]
    fn blocked_symbol_is_inactive() {
        let mut reg = SymbolRegistry::new();
        reg.block("eurusd");
        assert!(!reg.is_active("eurusd"));
        assert!(reg.is_active("BTCUSDT"));
    }

    #[test]
    fn allow_list_restricts_to_members() {
        let mut reg = SymbolRegistry::new();
        reg.allow("BTCUSDT");
        assert!(reg.is_active("BTCUSDT"));
        assert!(!reg.is_active("eurusd"));
    }

    #[test]
    fn allow_overrides_earlier_block() {
        let mut reg = SymbolRegistry::new();
        reg.block("xauusd");
        reg.allow("xauusd");
        assert!(reg.is_active("xauusd"));
    }

    #[test]
    fn meta_serde_roundtrip_fills_default_point_value() {
        let json = r#"{
            "symbol": "eurusd",
            "asset_type": "tradfi",
            "exchange": "dukascopy",
            "table_name": "eurusd",
            "first_timestamp": null,
            "last_timestamp": null
        }"#;
        let meta: SymbolMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.point_value, 1.0);
        assert_eq!(meta.asset_type, AssetType::Tradfi);
    }
}
