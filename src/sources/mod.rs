pub mod adapter;
pub mod connectors;
pub mod health;
pub mod rate_limiter;
pub mod resolver;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::types::ids::SourceId;
use crate::types::instrument::{AssetClass, DataType};

pub use adapter::{AdapterRegistry, HistoryRange, SourceAdapter};
pub use health::{HealthBoard, ProviderHealth};
pub use rate_limiter::RateLimiter;
pub use resolver::{FetchLedger, FetchRecord, Resolved, Resolver};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Yahoo,
    AlphaVantage,
    Cftc,
    Replay,
}

impl ProviderKind {
    /// Data types the provider's API can serve at all.
    pub fn native_data_types(&self) -> &'static [DataType] {
        match self {
            ProviderKind::Yahoo | ProviderKind::AlphaVantage => &[DataType::Quote, DataType::History],
            ProviderKind::Cftc => &[DataType::Positioning],
            ProviderKind::Replay => &DataType::ALL,
        }
    }

    pub fn requires_auth(&self) -> bool {
        matches!(self, ProviderKind::AlphaVantage)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_calls: u32,
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        RateLimitPolicy {
            max_calls: 5,
            window_secs: 60,
        }
    }
}

/// Static description of one configured provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProviderConfig {
    pub id: SourceId,
    pub kind: ProviderKind,
    pub asset_classes: Vec<AssetClass>,
    /// Restricts the provider to a subset of its native data types.
    #[serde(default)]
    pub data_types: Option<Vec<DataType>>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Fixture directory for replay providers.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub rate_limit: RateLimitPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn capabilities(&self) -> Capabilities {
        let native: BTreeSet<DataType> = self.kind.native_data_types().iter().copied().collect();
        let data_types = match &self.data_types {
            Some(subset) => subset.iter().copied().filter(|d| native.contains(d)).collect(),
            None => native,
        };

        Capabilities {
            asset_classes: self.asset_classes.iter().copied().collect(),
            data_types,
            requires_auth: self.kind.requires_auth(),
        }
    }
}

/// What an adapter declares it can serve. Never carries secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub asset_classes: BTreeSet<AssetClass>,
    pub data_types: BTreeSet<DataType>,
    pub requires_auth: bool,
}

impl Capabilities {
    pub fn new(
        asset_classes: impl IntoIterator<Item = AssetClass>,
        data_types: impl IntoIterator<Item = DataType>,
    ) -> Self {
        Capabilities {
            asset_classes: asset_classes.into_iter().collect(),
            data_types: data_types.into_iter().collect(),
            requires_auth: false,
        }
    }

    pub fn supports(&self, asset_class: AssetClass, data_type: DataType) -> bool {
        self.asset_classes.contains(&asset_class) && self.data_types.contains(&data_type)
    }
}

/// Static priority order of providers for one asset class and data type.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RouteConfig {
    pub asset_class: AssetClass,
    pub data_type: DataType,
    pub sources: Vec<SourceId>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub attempt_timeout_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub history_years: u32,
    /// Successful fetches kept in the audit ledger.
    pub ledger_capacity: usize,
}

impl ResolverConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            attempt_timeout_ms: 10_000,
            failure_threshold: 3,
            cooldown_secs: 300,
            history_years: 10,
            ledger_capacity: 50_000,
        }
    }
}
