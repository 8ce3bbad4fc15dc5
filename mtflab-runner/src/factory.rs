//! Strategy factory — builds registered strategies from config sections.

use crate::config::{ConfigError, StrategySection};
use mtflab_core::strategy::{MaCrossover, MtfTrend, ParamError, Strategy, StrategyParams};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("unknown strategy id {0:?}")]
    UnknownStrategy(String),

    #[error("strategy {id}: {source}")]
    BadParams {
        id: String,
        #[source]
        source: ParamError,
    },

    #[error("strategy {0}: missing higher_timeframe")]
    MissingHigherTimeframe(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Instantiate one strategy from its config section.
pub fn build_strategy(section: &StrategySection) -> Result<Box<dyn Strategy>, FactoryError> {
    let allowed_days = section.allowed_weekdays()?;
    let bad_params = |source| FactoryError::BadParams { id: section.id.clone(), source };

    match section.id.as_str() {
        "ma_crossover" => {
            let params =
                StrategyParams::resolve(&MaCrossover::schema(), &section.params, allowed_days)
                    .map_err(bad_params)?;
            Ok(Box::new(MaCrossover::new(&section.timeframe, params)))
        }
        "mtf_trend" => {
            let higher = section
                .higher_timeframe
                .as_deref()
                .ok_or_else(|| FactoryError::MissingHigherTimeframe(section.id.clone()))?;
            let params =
                StrategyParams::resolve(&MtfTrend::schema(), &section.params, allowed_days)
                    .map_err(bad_params)?;
            Ok(Box::new(MtfTrend::new(&section.timeframe, higher, params)))
        }
        other => Err(FactoryError::UnknownStrategy(other.to_string())),
    }
}
