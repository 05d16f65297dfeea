use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::types::instrument::DataType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurableBackend {
    File,
    Memory,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub quote_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub positioning_ttl_secs: u64,
    pub hot_capacity: usize,
    /// Oldest durable entry served without going upstream, per data type.
    pub quote_max_age_secs: u64,
    pub history_max_age_secs: u64,
    pub positioning_max_age_secs: u64,
    pub durable_backend: DurableBackend,
    pub durable_dir: PathBuf,
    /// Fetches kept per key after each published cycle. Every fetch carries
    /// the provider's full window, so a few are enough to rebuild the tiers.
    pub durable_retention: usize,
}

impl CacheConfig {
    pub fn ttl(&self, data_type: DataType) -> Duration {
        Duration::from_secs(match data_type {
            DataType::Quote => self.quote_ttl_secs,
            DataType::History => self.history_ttl_secs,
            DataType::Positioning => self.positioning_ttl_secs,
        })
    }

    pub fn max_durable_age(&self, data_type: DataType) -> Duration {
        Duration::from_secs(match data_type {
            DataType::Quote => self.quote_max_age_secs,
            DataType::History => self.history_max_age_secs,
            DataType::Positioning => self.positioning_max_age_secs,
        })
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            quote_ttl_secs: 300,
            history_ttl_secs: 6 * 3600,
            positioning_ttl_secs: 24 * 3600,
            hot_capacity: 4096,
            quote_max_age_secs: 900,
            history_max_age_secs: 24 * 3600,
            positioning_max_age_secs: 3 * 24 * 3600,
            durable_backend: DurableBackend::File,
            durable_dir: PathBuf::from("data/durable"),
            durable_retention: 8,
        }
    }
}
