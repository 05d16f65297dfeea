use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::types::ids::{SourceId, Symbol};
use crate::types::instrument::DataType;

/// One fetched data point. Immutable once written to the cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub change: Option<f64>,
    pub volume: Option<f64>,
    pub source: SourceId,
    pub fetch_latency_ms: u64,
}

impl Observation {
    /// Rejects non-finite or non-positive prices instead of carrying them forward.
    pub fn new(
        symbol: Symbol,
        timestamp: DateTime<Utc>,
        price: f64,
        source: SourceId,
    ) -> Result<Self> {
        if !price.is_finite() || price <= 0.0 {
            return Err(Error::MalformedPayload(format!(
                "{} from {}: invalid price {}",
                symbol, source, price
            )));
        }

        Ok(Observation {
            symbol,
            timestamp,
            price,
            change: None,
            volume: None,
            source,
            fetch_latency_ms: 0,
        })
    }

    pub fn with_change(mut self, change: Option<f64>) -> Self {
        self.change = change.filter(|c| c.is_finite());
        self
    }

    pub fn with_volume(mut self, volume: Option<f64>) -> Self {
        self.volume = volume.filter(|v| v.is_finite() && *v >= 0.0);
        self
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// A single periodic positioning disclosure for one contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositioningRecord {
    pub symbol: Symbol,
    pub report_date: NaiveDate,
    pub long: f64,
    pub short: f64,
    pub open_interest: Option<f64>,
    pub source: SourceId,
}

impl PositioningRecord {
    pub fn new(
        symbol: Symbol,
        report_date: NaiveDate,
        long: f64,
        short: f64,
        source: SourceId,
    ) -> Result<Self> {
        if !long.is_finite() || !short.is_finite() || long < 0.0 || short < 0.0 {
            return Err(Error::MalformedPayload(format!(
                "{} report {} from {}: invalid positions long={} short={}",
                symbol, report_date, source, long, short
            )));
        }

        Ok(PositioningRecord {
            symbol,
            report_date,
            long,
            short,
            open_interest: None,
            source,
        })
    }

    pub fn net_position(&self) -> f64 {
        self.long - self.short
    }
}

/// The value produced by one successful provider fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Quote(Observation),
    History(Vec<Observation>),
    Positioning(Vec<PositioningRecord>),
}

impl Payload {
    pub fn data_type(&self) -> DataType {
        match self {
            Payload::Quote(_) => DataType::Quote,
            Payload::History(_) => DataType::History,
            Payload::Positioning(_) => DataType::Positioning,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Quote(_) => 1,
            Payload::History(bars) => bars.len(),
            Payload::Positioning(reports) => reports.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_quote(&self) -> Option<&Observation> {
        match self {
            Payload::Quote(obs) => Some(obs),
            _ => None,
        }
    }

    pub(crate) fn stamp_latency(&mut self, latency_ms: u64) {
        match self {
            Payload::Quote(obs) => obs.fetch_latency_ms = latency_ms,
            Payload::History(bars) => {
                for bar in bars.iter_mut() {
                    bar.fetch_latency_ms = latency_ms;
                }
            }
            Payload::Positioning(_) => {}
        }
    }
}
