//! mtflab core engine
//!
//! Multi-timeframe, bar-by-bar backtesting: domain types, lookahead-free
//! alignment, position management, the strategy protocol, performance
//! tracking, and the engine loop.

pub mod data;
pub mod domain;
pub mod engine;
pub mod perf;
pub mod position;
pub mod strategy;
