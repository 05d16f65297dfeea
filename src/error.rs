use std::fmt;
use thiserror::Error;
use crate::types::ids::{CycleId, SourceId, Symbol};
use crate::types::instrument::{AssetClass, DataType};

#[derive(Error, Debug, Clone)]
pub enum Error {
    // Source Errors
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Rate limited: {0}")]
    RateLimited(SourceId),

    #[error("Source {source_id} does not provide {data_type}")]
    Unsupported {
        source_id: SourceId,
        data_type: DataType,
    },

    // Resolver Errors
    #[error("All sources exhausted for {symbol} {data_type}: {}", format_attempts(.attempts))]
    AllSourcesExhausted {
        symbol: Symbol,
        data_type: DataType,
        attempts: Vec<SourceAttempt>,
    },

    #[error("No sources configured for {asset_class} {data_type}")]
    NoSourcesConfigured {
        asset_class: AssetClass,
        data_type: DataType,
    },

    // Storage Errors
    #[error("Durable store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid checksum")]
    InvalidChecksum,

    // Cycle Errors
    #[error("Cycle {cycle_id} failed in {stage}: {reason}")]
    CycleFailed {
        cycle_id: CycleId,
        stage: String,
        reason: String,
    },

    #[error("A cycle is already in progress")]
    CycleInProgress,

    #[error("No cycle has been published yet")]
    NoPublishedCycle,

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    // System Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Failures that count against a provider's health.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_) | Error::MalformedPayload(_) | Error::RateLimited(_)
        )
    }

    /// Failures that abort the whole cycle rather than one symbol.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::StoreUnavailable(_) | Error::IoError(_) | Error::InvalidChecksum
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

/// Why one provider did not produce a value during a resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttempt {
    pub source_id: SourceId,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    RateLimited,
    CoolingDown,
    Failed(String),
}

impl fmt::Display for SourceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::RateLimited => write!(f, "{}=rate_limited", self.source_id),
            AttemptOutcome::CoolingDown => write!(f, "{}=cooling_down", self.source_id),
            AttemptOutcome::Failed(reason) => write!(f, "{}=failed({})", self.source_id, reason),
        }
    }
}

fn format_attempts(attempts: &[SourceAttempt]) -> String {
    if attempts.is_empty() {
        return "no candidates".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
