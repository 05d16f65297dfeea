use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};
use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use crate::types::ids::{CycleId, RunId, Symbol};
use crate::types::instrument::DataType;

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::ConfigError(format!("invalid log level {:?}: {}", config.level, e)))?;

    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::ConfigError(format!("tracing already initialised: {}", e)))
}

pub fn cycle_span(cycle_id: CycleId, run_id: RunId) -> Span {
    tracing::info_span!(
        "cycle",
        cycle_id = %cycle_id,
        run_id = %run_id,
    )
}

pub fn resolve_span(symbol: &Symbol, data_type: DataType) -> Span {
    tracing::debug_span!(
        "resolve",
        symbol = %symbol,
        data_type = %data_type,
    )
}
