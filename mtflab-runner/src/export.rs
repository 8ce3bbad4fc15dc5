//! Artifact export — JSON manifest, trade and equity CSVs.
//!
//! The trade CSV's column order is part of the external contract:
//! strategy, side, entry_time, entry_price, exit_time, exit_price,
//! initial_size, initial_risk, realized_pnl, r_multiple, close_reason,
//! duration_bars. Timestamps are ISO-8601 UTC; numerics keep full
//! precision.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use mtflab_core::perf::EquitySample;
use mtflab_core::position::TradeRecord;

use crate::result::{BacktestResult, SCHEMA_VERSION};

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ─── JSON ───────────────────────────────────────────────────────────

/// Serialize a result to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a result from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Export the trade log in the fixed column order.
pub fn export_trades_csv(trades: &[TradeRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "strategy",
        "side",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "initial_size",
        "initial_risk",
        "realized_pnl",
        "r_multiple",
        "close_reason",
        "duration_bars",
    ])?;

    for t in trades {
        wtr.write_record([
            t.strategy.as_str(),
            &t.side.to_string(),
            &iso(t.entry_time),
            &t.entry_price.to_string(),
            &iso(t.exit_time),
            &t.exit_price.to_string(),
            &t.initial_size.to_string(),
            &t.initial_risk.to_string(),
            &t.realized_pnl.to_string(),
            &t.r_multiple.to_string(),
            t.close_reason.as_str(),
            &t.duration_bars.to_string(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export the equity log: timestamp, realized, unrealized, drawdown.
pub fn export_equity_csv(samples: &[EquitySample]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "realized", "unrealized", "drawdown"])?;
    for s in samples {
        wtr.write_record([
            &iso(s.timestamp),
            &s.realized.to_string(),
            &s.unrealized.to_string(),
            &s.drawdown.to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set for a run under
/// `{output_dir}/{symbol}_{timestamp}/`: `manifest.json`, `trades.csv`,
/// `equity.csv`. Returns the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!(
        "{}_{}",
        result.symbol,
        result.generated_at.format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)?;
    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(&result.trades)?)?;
    std::fs::write(run_dir.join("equity.csv"), export_equity_csv(&result.equity_curve)?)?;

    Ok(run_dir)
}

/// Load a result back from an artifact directory's manifest.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}
