use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::sources::connectors::{
    alpha_vantage::AlphaVantageAdapter, cftc::CftcAdapter, replay::ReplayAdapter,
    yahoo::YahooAdapter,
};
use crate::sources::{Capabilities, ProviderConfig, ProviderKind};
use crate::types::ids::SourceId;
use crate::types::instrument::{DataType, Instrument};
use crate::types::observation::{Observation, PositioningRecord};

/// Inclusive date range of daily history to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl HistoryRange {
    pub fn years_back(end: NaiveDate, years: u32) -> Self {
        let start = end
            .with_year(end.year() - years as i32)
            .unwrap_or_else(|| end - chrono::Duration::days(365 * years as i64));
        HistoryRange { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Uniform fetch interface over one external provider.
///
/// Implementations return a typed error on any failure and never a
/// partially parsed or placeholder value.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &SourceId;

    fn capabilities(&self) -> &Capabilities;

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<Observation>;

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<Vec<Observation>>;

    /// Only providers publishing positioning reports override this.
    async fn fetch_report(&self, instrument: &Instrument) -> Result<Vec<PositioningRecord>> {
        let _ = instrument;
        Err(Error::Unsupported {
            source_id: self.source_id().clone(),
            data_type: DataType::Positioning,
        })
    }
}

/// Adapters keyed by provider id.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        AdapterRegistry {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> &mut Self {
        let id = adapter.source_id().clone();
        tracing::info!("Registered source adapter: {}", id);
        self.adapters.insert(id, adapter);
        self
    }

    pub fn get(&self, source_id: &SourceId) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(source_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &SourceId> {
        self.adapters.keys()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Builds one adapter per enabled provider.
    pub fn from_config<'a>(
        providers: impl IntoIterator<Item = &'a ProviderConfig>,
        client: reqwest::Client,
    ) -> Result<Self> {
        let mut registry = AdapterRegistry::new();

        for provider in providers.into_iter().filter(|p| p.enabled) {
            let adapter: Arc<dyn SourceAdapter> = match provider.kind {
                ProviderKind::Yahoo => Arc::new(YahooAdapter::new(provider, client.clone())),
                ProviderKind::AlphaVantage => {
                    Arc::new(AlphaVantageAdapter::from_env(provider, client.clone())?)
                }
                ProviderKind::Cftc => Arc::new(CftcAdapter::new(provider, client.clone())),
                ProviderKind::Replay => Arc::new(ReplayAdapter::new(provider)?),
            };
            registry.register(adapter);
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_range_spans_whole_years() {
        let end = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        let range = HistoryRange::years_back(end, 1);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2023, 2, 15).unwrap());
        assert!(range.contains(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
    }

    #[test]
    fn leap_day_falls_back_to_day_count() {
        let end = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let range = HistoryRange::years_back(end, 1);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2023, 3, 1).unwrap());
    }
}
