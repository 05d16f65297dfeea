use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod cache;
pub mod loader;
pub mod pipeline;

pub use cache::{CacheConfig, DurableBackend};
pub use loader::AppConfig;
pub use pipeline::{
    ConfluenceConfig, PositioningConfig, PositioningMode, SeasonalityConfig, SelectionConfig,
};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_secs: u64,
    /// Wall-clock instant cycles are aligned to (e.g. just after the weekly report release).
    pub anchor: DateTime<Utc>,
    pub run_on_start: bool,
    pub fetch_concurrency: usize,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            interval_secs: 7 * 24 * 3600,  // weekly
            // Friday 21:00 UTC, after the weekly positioning release
            anchor: DateTime::from_timestamp(1_704_488_400, 0).unwrap_or_default(),
            run_on_start: true,
            fetch_concurrency: 8,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub history_retention: usize,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        ArtifactConfig {
            dir: PathBuf::from("artifacts"),
            history_retention: 52,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            enabled: true,
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}
