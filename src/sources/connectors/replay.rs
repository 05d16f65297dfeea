//! Serves recorded provider responses from a fixture directory.
//!
//! Layout: `{dir}/{asset_class}/{symbol}.{quote|history|positioning}.json`.
//! The adapter declares the configured asset classes that have a
//! subdirectory. Within one, a missing file behaves like an unreachable
//! provider so fallback ordering can be exercised offline.

use std::path::{Component, Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::sources::adapter::{HistoryRange, SourceAdapter};
use crate::sources::{Capabilities, ProviderConfig};
use crate::types::ids::SourceId;
use crate::types::instrument::{DataType, Instrument};
use crate::types::observation::{Observation, PositioningRecord};

pub struct ReplayAdapter {
    source_id: SourceId,
    capabilities: Capabilities,
    dir: PathBuf,
}

impl ReplayAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let dir = config.path.clone().ok_or_else(|| {
            Error::ConfigError(format!("replay provider {} needs a fixture path", config.id))
        })?;

        let mut capabilities = config.capabilities();
        capabilities.asset_classes.retain(|asset_class| {
            let present = dir.join(asset_class.to_string()).is_dir();
            if !present {
                tracing::warn!(
                    "Replay provider {} has no {} fixtures under {:?}",
                    config.id, asset_class, dir
                );
            }
            present
        });

        Ok(ReplayAdapter {
            source_id: config.id.clone(),
            capabilities,
            dir,
        })
    }

    fn fixture_path(&self, instrument: &Instrument, data_type: DataType) -> Result<PathBuf> {
        let symbol = instrument.symbol_for(&self.source_id);
        if !is_plain_file_name(symbol) {
            return Err(Error::MalformedPayload(format!(
                "{}: symbol {:?} is not a plain file name",
                self.source_id, symbol
            )));
        }
        Ok(self.dir
            .join(instrument.asset_class.to_string())
            .join(format!("{}.{}.json", symbol, data_type)))
    }

    async fn load<T: DeserializeOwned>(&self, instrument: &Instrument, data_type: DataType) -> Result<T> {
        let file = self.fixture_path(instrument, data_type)?;

        let bytes = tokio::fs::read(&file).await.map_err(|e| {
            Error::UpstreamUnavailable(format!("{}: {}: {}", self.source_id, file.display(), e))
        })?;

        serde_json::from_slice(&bytes).map_err(|e| {
            Error::MalformedPayload(format!("{}: {}: {}", self.source_id, file.display(), e))
        })
    }

    fn observation(&self, instrument: &Instrument, bar: RecordedBar) -> Result<Observation> {
        Ok(Observation::new(instrument.symbol.clone(), bar.timestamp, bar.price, self.source_id.clone())?
            .with_change(bar.change)
            .with_volume(bar.volume))
    }
}

#[async_trait]
impl SourceAdapter for ReplayAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<Observation> {
        let bar: RecordedBar = self.load(instrument, DataType::Quote).await?;
        self.observation(instrument, bar)
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<Vec<Observation>> {
        let bars: Vec<RecordedBar> = self.load(instrument, DataType::History).await?;

        let mut history = bars.into_iter()
            .filter(|bar| range.contains(bar.timestamp.date_naive()))
            .map(|bar| self.observation(instrument, bar))
            .collect::<Result<Vec<_>>>()?;
        history.sort_by_key(|obs| obs.timestamp);
        Ok(history)
    }

    async fn fetch_report(&self, instrument: &Instrument) -> Result<Vec<PositioningRecord>> {
        let reports: Vec<RecordedReport> = self.load(instrument, DataType::Positioning).await?;

        let mut records = reports.into_iter()
            .map(|r| {
                let mut record = PositioningRecord::new(
                    instrument.symbol.clone(),
                    r.report_date,
                    r.long,
                    r.short,
                    self.source_id.clone(),
                )?;
                record.open_interest = r.open_interest;
                Ok(record)
            })
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.report_date);
        Ok(records)
    }
}

/// Exactly one normal path component, so the fixture stays inside its directory.
fn is_plain_file_name(symbol: &str) -> bool {
    let mut components = Path::new(symbol).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == symbol
    ) && !symbol.contains(['/', '\\'])
}

#[derive(Debug, Deserialize)]
struct RecordedBar {
    timestamp: DateTime<Utc>,
    price: f64,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RecordedReport {
    report_date: NaiveDate,
    long: f64,
    short: f64,
    #[serde(default)]
    open_interest: Option<f64>,
}
