//! Deterministic synthetic market data.
//!
//! Seeded random-walk OHLCV for demos and tests. The higher-timeframe
//! frame is resampled from the base bars, so the two series describe the
//! same tape and alignment against them is meaningful.

use chrono::{DateTime, Utc};
use mtflab_core::data::MarketFrame;
use mtflab_core::domain::{Bar, Timeframe};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Generate a random-walk base frame plus an optional resampled higher
/// frame, keyed by the labels given.
pub fn random_walk_frames(
    symbol: &str,
    seed: u64,
    start: DateTime<Utc>,
    bar_count: usize,
    base_label: &str,
    higher_label: Option<&str>,
) -> BTreeMap<String, MarketFrame> {
    let base_tf: Timeframe = base_label.parse().expect("valid base label");
    let bars = random_walk_bars(seed, start, bar_count, base_tf, 100.0);

    let mut frames = BTreeMap::new();
    if let Some(higher_label) = higher_label {
        let higher_tf: Timeframe = higher_label.parse().expect("valid higher label");
        let higher_bars = resample(&bars, base_tf, higher_tf);
        frames.insert(
            higher_label.to_string(),
            MarketFrame::from_bars(symbol, higher_tf, higher_bars).expect("resampled bars valid"),
        );
    }
    frames.insert(
        base_label.to_string(),
        MarketFrame::from_bars(symbol, base_tf, bars).expect("generated bars valid"),
    );
    frames
}

/// Seeded random-walk bars: ~0.2% steps with intra-bar wicks.
pub fn random_walk_bars(
    seed: u64,
    start: DateTime<Utc>,
    bar_count: usize,
    timeframe: Timeframe,
    start_price: f64,
) -> Vec<Bar> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut bars = Vec::with_capacity(bar_count);
    let mut price = start_price;

    for i in 0..bar_count {
        let open = price;
        let step: f64 = rng.gen_range(-0.002..0.002);
        let close = open * (1.0 + step);
        let wick_up: f64 = rng.gen_range(0.0..0.001);
        let wick_down: f64 = rng.gen_range(0.0..0.001);
        let high = open.max(close) * (1.0 + wick_up);
        let low = open.min(close) * (1.0 - wick_down);
        let volume = rng.gen_range(10.0..1_000.0);

        bars.push(Bar::new(
            start + timeframe.duration() * i as i32,
            open,
            high,
            low,
            close,
            Some(volume),
        ));
        price = close;
    }
    bars
}

/// Resample base bars into a higher timeframe by chunking. Only chunks
/// that start on a higher-timeframe boundary and are complete survive.
pub fn resample(bars: &[Bar], base: Timeframe, higher: Timeframe) -> Vec<Bar> {
    let per_bucket = (higher.minutes() / base.minutes().max(1)) as usize;
    if per_bucket == 0 || bars.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut i = 0;
    while i + per_bucket <= bars.len() {
        let ts = bars[i].timestamp;
        // Skip until a bucket boundary in wall-clock terms.
        if ts.timestamp() % (higher.minutes() as i64 * 60) != 0 {
            i += 1;
            continue;
        }
        let chunk = &bars[i..i + per_bucket];
        let volume: f64 = chunk.iter().filter_map(|b| b.volume).sum();
        out.push(Bar::new(
            ts,
            chunk[0].open,
            chunk.iter().map(|b| b.high).fold(f64::MIN, f64::max),
            chunk.iter().map(|b| b.low).fold(f64::MAX, f64::min),
            chunk[chunk.len() - 1].close,
            Some(volume),
        ));
        i += per_bucket;
    }
    out
}

/// Exponential moving average of a series, seeded with the first value.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if values.is_empty() || period == 0 {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = values[0];
    for &value in values {
        current = alpha * value + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Attach `ema_fast` / `ema_slow` columns computed from closes, the shape
/// the bundled trend strategy expects from the indicator layer.
pub fn with_ema_columns(
    frame: MarketFrame,
    fast_period: usize,
    slow_period: usize,
) -> MarketFrame {
    let closes: Vec<f64> = frame.bars().iter().map(|b| b.close).collect();
    frame
        .with_column("ema_fast", ema(&closes, fast_period))
        .expect("column length matches")
        .with_column("ema_slow", ema(&closes, slow_period))
        .expect("column length matches")
}
