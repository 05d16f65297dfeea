use std::collections::HashSet;
use crate::config::*;
use crate::error::{Error, Result};
use crate::sources::{ProviderConfig, ResolverConfig, RouteConfig};
use crate::types::instrument::{DataType, Instrument};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub resolver: ResolverConfig,
    pub providers: Vec<ProviderConfig>,
    pub routes: Vec<RouteConfig>,
    pub instruments: Vec<Instrument>,
    pub cache: CacheConfig,
    pub positioning: PositioningConfig,
    pub seasonality: SeasonalityConfig,
    pub confluence: ConfluenceConfig,
    pub selection: SelectionConfig,
    pub artifacts: ArtifactConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("SIGNALINFRA").separator("__"))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(&provider.id) {
                return Err(Error::ConfigError(format!("duplicate provider id {}", provider.id)));
            }
            if provider.rate_limit.max_calls == 0 || provider.rate_limit.window_secs == 0 {
                return Err(Error::ConfigError(format!(
                    "provider {} has an empty rate-limit budget",
                    provider.id
                )));
            }
            if provider.kind.requires_auth() && provider.api_key_env.is_none() {
                return Err(Error::ConfigError(format!(
                    "provider {} requires api_key_env",
                    provider.id
                )));
            }
        }

        for route in &self.routes {
            for source in &route.sources {
                let provider = self.providers.iter()
                    .find(|p| &p.id == source)
                    .ok_or_else(|| Error::ConfigError(format!(
                        "route {} {} names unknown provider {}",
                        route.asset_class, route.data_type, source
                    )))?;

                if !provider.capabilities().supports(route.asset_class, route.data_type) {
                    return Err(Error::ConfigError(format!(
                        "provider {} cannot serve {} {}",
                        source, route.asset_class, route.data_type
                    )));
                }
            }
        }

        let c = &self.confluence;
        if !(c.positioning_weight >= 0.0 && c.seasonality_weight >= 0.0)
            || c.positioning_weight + c.seasonality_weight <= 0.0
        {
            return Err(Error::ConfigError("confluence weights must be non-negative and not both zero".into()));
        }
        if !(0.0..=100.0).contains(&c.confidence_floor) {
            return Err(Error::ConfigError(format!(
                "confidence floor {} outside 0-100",
                c.confidence_floor
            )));
        }

        let p = &self.positioning;
        if p.min_periods < 2 || p.min_periods > p.window {
            return Err(Error::ConfigError(format!(
                "positioning window {} / min_periods {} invalid (need 2 <= min_periods <= window)",
                p.window, p.min_periods
            )));
        }

        if self.seasonality.min_samples == 0 || self.seasonality.return_scale <= 0.0 {
            return Err(Error::ConfigError("seasonality min_samples and return_scale must be positive".into()));
        }

        if self.cache.durable_retention == 0 {
            return Err(Error::ConfigError("cache.durable_retention must be at least 1".into()));
        }

        if self.scheduler.interval_secs == 0 || self.scheduler.fetch_concurrency == 0 {
            return Err(Error::ConfigError("scheduler interval and fetch_concurrency must be positive".into()));
        }

        let mut symbols = HashSet::new();
        for instrument in &self.instruments {
            if !symbols.insert(&instrument.symbol) {
                return Err(Error::ConfigError(format!("duplicate instrument {}", instrument.symbol)));
            }

            let wants_positioning = self.routes.iter()
                .any(|r| r.asset_class == instrument.asset_class && r.data_type == DataType::Positioning);
            if wants_positioning && instrument.report_code.is_none() {
                return Err(Error::ConfigError(format!(
                    "instrument {} ({}) has a positioning route but no report_code",
                    instrument.symbol, instrument.asset_class
                )));
            }

            for data_type in instrument.data_types() {
                let routed = self.routes.iter()
                    .any(|r| r.asset_class == instrument.asset_class && r.data_type == data_type);
                if !routed && data_type != DataType::Quote {
                    tracing::warn!(
                        "No {} route for {} ({})",
                        data_type, instrument.symbol, instrument.asset_class
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::instrument::AssetClass;

    const SAMPLE: &str = r#"
        [[providers]]
        id = "yahoo"
        kind = "yahoo"
        asset_classes = ["equity", "commodity"]
        rate_limit = { max_calls = 5, window_secs = 60 }

        [[providers]]
        id = "cftc"
        kind = "cftc"
        asset_classes = ["commodity"]

        [[routes]]
        asset_class = "commodity"
        data_type = "positioning"
        sources = ["cftc"]

        [[instruments]]
        symbol = "GOLD"
        asset_class = "commodity"
        report_code = "088691"
        aliases = { yahoo = "GC=F" }

        [confluence]
        positioning_weight = 0.7
        seasonality_weight = 0.3
        confidence_floor = 55.0
    "#;

    #[test]
    fn parses_toml_and_fills_defaults() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[1].rate_limit.max_calls, 5);
        assert_eq!(config.instruments[0].asset_class, AssetClass::Commodity);
        assert_eq!(config.confluence.confidence_floor, 55.0);
        assert_eq!(config.positioning.window, 26);
        assert_eq!(config.seasonality.min_samples, 5);
    }

    #[test]
    fn rejects_route_to_incapable_provider() {
        let raw = format!(
            "{}\n{}",
            SAMPLE,
            r#"
            [[routes]]
            asset_class = "equity"
            data_type = "positioning"
            sources = ["yahoo"]
            "#
        );
        let err = AppConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains("cannot serve")));
    }

    #[test]
    fn rejects_positioning_window_without_comparison() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.positioning.window = 1;
        config.positioning.min_periods = 1;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains("min_periods")));
    }

    #[test]
    fn rejects_durable_retention_of_zero() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.cache.durable_retention = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unknown_provider_in_route() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.routes[0].sources.push("nowhere".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_positioning_instrument_without_report_code() {
        let raw = format!(
            "{}\n{}",
            SAMPLE,
            r#"
            [[instruments]]
            symbol = "SILVER"
            asset_class = "commodity"
            "#
        );
        let err = AppConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, Error::ConfigError(msg) if msg.contains("report_code")));
    }

    #[test]
    fn shipped_default_config_is_valid() {
        let raw = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/config/default.toml")).unwrap();
        let config = AppConfig::from_toml_str(&raw).unwrap();

        assert_eq!(config.scheduler.interval_secs, 7 * 24 * 3600);
        assert!(!config.providers.iter().any(|p| p.id.as_str() == "alpha_vantage" && p.enabled));
        assert_eq!(config.instruments.len(), 5);
    }

    #[test]
    fn rejects_floor_outside_range() {
        let mut config = AppConfig::default();
        config.confluence.confidence_floor = 120.0;
        assert!(config.validate().is_err());
    }
}
