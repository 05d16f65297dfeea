//! CFTC Commitments of Traders via the public Socrata endpoint.
//!
//! Serves positioning only. Non-commercial long and short totals are used as
//! the speculative positioning series.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::sources::adapter::{HistoryRange, SourceAdapter};
use crate::sources::connectors::{get_json, parse_number};
use crate::sources::{Capabilities, ProviderConfig};
use crate::types::ids::SourceId;
use crate::types::instrument::{DataType, Instrument};
use crate::types::observation::{Observation, PositioningRecord};

const DEFAULT_BASE_URL: &str = "https://publicreporting.cftc.gov";
const LEGACY_FUTURES_DATASET: &str = "6dca-aqww";
/// Roughly five years of weekly reports.
const REPORT_LIMIT: usize = 260;

pub struct CftcAdapter {
    source_id: SourceId,
    capabilities: Capabilities,
    base_url: String,
    client: reqwest::Client,
}

impl CftcAdapter {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> Self {
        CftcAdapter {
            source_id: config.id.clone(),
            capabilities: config.capabilities(),
            base_url: config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }

    fn unsupported(&self, data_type: DataType) -> Error {
        Error::Unsupported {
            source_id: self.source_id.clone(),
            data_type,
        }
    }

    fn parse_row(&self, instrument: &Instrument, row: CotRow) -> Result<PositioningRecord> {
        // dates arrive as "2024-03-05T00:00:00.000"
        let date_part = row.report_date.get(..10).unwrap_or(&row.report_date);
        let report_date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|_| {
            Error::MalformedPayload(format!("{}: bad report date {:?}", self.source_id, row.report_date))
        })?;

        let long = parse_number(&self.source_id, "noncomm_positions_long_all", &row.long)?;
        let short = parse_number(&self.source_id, "noncomm_positions_short_all", &row.short)?;
        let open_interest = row.open_interest.as_deref()
            .map(|oi| parse_number(&self.source_id, "open_interest_all", oi))
            .transpose()?;

        let mut record = PositioningRecord::new(
            instrument.symbol.clone(),
            report_date,
            long,
            short,
            self.source_id.clone(),
        )?;
        record.open_interest = open_interest;
        Ok(record)
    }
}

#[async_trait]
impl SourceAdapter for CftcAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn fetch_quote(&self, _instrument: &Instrument) -> Result<Observation> {
        Err(self.unsupported(DataType::Quote))
    }

    async fn fetch_history(
        &self,
        _instrument: &Instrument,
        _range: HistoryRange,
    ) -> Result<Vec<Observation>> {
        Err(self.unsupported(DataType::History))
    }

    async fn fetch_report(&self, instrument: &Instrument) -> Result<Vec<PositioningRecord>> {
        let code = instrument.report_code.as_deref()
            .ok_or_else(|| self.unsupported(DataType::Positioning))?;

        let request = self.client
            .get(format!(
                "{}/resource/{}.json",
                self.base_url.trim_end_matches('/'),
                LEGACY_FUTURES_DATASET
            ))
            .query(&[
                ("cftc_contract_market_code", code.to_string()),
                ("$order", "report_date_as_yyyy_mm_dd DESC".to_string()),
                ("$limit", REPORT_LIMIT.to_string()),
            ]);

        let rows: Vec<CotRow> = get_json(&self.source_id, request).await?;

        let mut records = rows.into_iter()
            .map(|row| self.parse_row(instrument, row))
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.report_date);
        records.dedup_by_key(|r| r.report_date);

        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
struct CotRow {
    #[serde(rename = "report_date_as_yyyy_mm_dd")]
    report_date: String,
    #[serde(rename = "noncomm_positions_long_all")]
    long: String,
    #[serde(rename = "noncomm_positions_short_all")]
    short: String,
    #[serde(rename = "open_interest_all")]
    open_interest: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::sources::{ProviderKind, RateLimitPolicy};
    use crate::types::instrument::AssetClass;

    fn adapter(server: &MockServer) -> CftcAdapter {
        let config = ProviderConfig {
            id: SourceId::from("cftc"),
            kind: ProviderKind::Cftc,
            asset_classes: vec![AssetClass::Commodity],
            data_types: None,
            api_key_env: None,
            base_url: Some(server.uri()),
            path: None,
            rate_limit: RateLimitPolicy::default(),
            enabled: true,
        };
        CftcAdapter::new(&config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn reports_come_back_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/resource/6dca-aqww.json"))
            .and(query_param("cftc_contract_market_code", "088691"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "report_date_as_yyyy_mm_dd": "2024-03-05T00:00:00.000",
                    "noncomm_positions_long_all": "250000",
                    "noncomm_positions_short_all": "50000",
                    "open_interest_all": "480000"
                },
                {
                    "report_date_as_yyyy_mm_dd": "2024-02-27T00:00:00.000",
                    "noncomm_positions_long_all": "240000",
                    "noncomm_positions_short_all": "60000"
                }
            ])))
            .mount(&server)
            .await;

        let gold = Instrument::new("GOLD", AssetClass::Commodity).with_report_code("088691");
        let reports = adapter(&server).fetch_report(&gold).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].report_date, NaiveDate::from_ymd_opt(2024, 2, 27).unwrap());
        assert_eq!(reports[1].net_position(), 200_000.0);
        assert_eq!(reports[1].open_interest, Some(480_000.0));
        assert_eq!(reports[0].open_interest, None);
    }

    #[tokio::test]
    async fn non_numeric_position_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "report_date_as_yyyy_mm_dd": "2024-03-05T00:00:00.000",
                    "noncomm_positions_long_all": "",
                    "noncomm_positions_short_all": "50000"
                }
            ])))
            .mount(&server)
            .await;

        let gold = Instrument::new("GOLD", AssetClass::Commodity).with_report_code("088691");
        let err = adapter(&server).fetch_report(&gold).await.unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn instrument_without_report_code_is_unsupported() {
        let server = MockServer::start().await;
        let spy = Instrument::new("SPY", AssetClass::Equity);

        let cftc = adapter(&server);
        assert!(matches!(cftc.fetch_report(&spy).await, Err(Error::Unsupported { .. })));
        assert!(matches!(cftc.fetch_quote(&spy).await, Err(Error::Unsupported { .. })));
    }
}
