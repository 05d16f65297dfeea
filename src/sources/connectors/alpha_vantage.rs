//! Alpha Vantage REST API. Requires an API key read from the environment.
//!
//! The free tier answers throttled requests with HTTP 200 and a `Note` or
//! `Information` body, which is surfaced as a rate-limit denial.

use std::collections::BTreeMap;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::sources::adapter::{HistoryRange, SourceAdapter};
use crate::sources::connectors::{get_json, parse_number};
use crate::sources::{Capabilities, ProviderConfig};
use crate::types::ids::SourceId;
use crate::types::instrument::Instrument;
use crate::types::observation::Observation;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

pub struct AlphaVantageAdapter {
    source_id: SourceId,
    capabilities: Capabilities,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AlphaVantageAdapter {
    pub fn new(config: &ProviderConfig, client: reqwest::Client, api_key: impl Into<String>) -> Self {
        AlphaVantageAdapter {
            source_id: config.id.clone(),
            capabilities: config.capabilities(),
            base_url: config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: api_key.into(),
            client,
        }
    }

    /// Reads the key from the variable named by `api_key_env`.
    pub fn from_env(config: &ProviderConfig, client: reqwest::Client) -> Result<Self> {
        let var = config.api_key_env.as_deref().ok_or_else(|| {
            Error::ConfigError(format!("provider {} needs api_key_env", config.id))
        })?;
        let key = std::env::var(var).map_err(|_| {
            Error::ConfigError(format!("provider {}: environment variable {} is not set", config.id, var))
        })?;
        if key.trim().is_empty() {
            return Err(Error::ConfigError(format!("provider {}: {} is empty", config.id, var)));
        }

        Ok(Self::new(config, client, key))
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<AvResponse> {
        let request = self.client
            .get(format!("{}/query", self.base_url.trim_end_matches('/')))
            .query(params)
            .query(&[("apikey", self.api_key.as_str())]);

        let response: AvResponse = get_json(&self.source_id, request).await?;

        if response.note.is_some() || response.information.is_some() {
            return Err(Error::RateLimited(self.source_id.clone()));
        }
        if let Some(message) = &response.error_message {
            return Err(Error::MalformedPayload(format!("{}: {}", self.source_id, message)));
        }

        Ok(response)
    }
}

#[async_trait]
impl SourceAdapter for AlphaVantageAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<Observation> {
        let symbol = instrument.symbol_for(&self.source_id);
        let response = self.query(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol)]).await?;

        let quote = response.global_quote
            .filter(|q| q.price.is_some())
            .ok_or_else(|| {
                Error::MalformedPayload(format!("{}: empty quote for {}", self.source_id, symbol))
            })?;

        let raw_price = quote.price.as_deref().unwrap_or_default();
        let price = parse_number(&self.source_id, "05. price", raw_price)?;
        let day = quote.latest_trading_day.as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| {
                Error::MalformedPayload(format!("{}: no trading day for {}", self.source_id, symbol))
            })?;
        let change = quote.change.as_deref()
            .map(|c| parse_number(&self.source_id, "09. change", c))
            .transpose()?;
        let volume = quote.volume.as_deref()
            .map(|v| parse_number(&self.source_id, "06. volume", v))
            .transpose()?;

        Ok(Observation::new(
            instrument.symbol.clone(),
            day.and_time(chrono::NaiveTime::MIN).and_utc(),
            price,
            self.source_id.clone(),
        )?
        .with_change(change)
        .with_volume(volume))
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<Vec<Observation>> {
        let symbol = instrument.symbol_for(&self.source_id);
        let response = self.query(&[
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            ("outputsize", "full"),
        ]).await?;

        let series = response.daily.ok_or_else(|| {
            Error::MalformedPayload(format!("{}: no daily series for {}", self.source_id, symbol))
        })?;

        let mut bars = Vec::new();
        // BTreeMap keeps ISO dates in chronological order
        for (raw_date, bar) in series {
            let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|_| {
                Error::MalformedPayload(format!("{}: bad date {:?}", self.source_id, raw_date))
            })?;
            if !range.contains(date) {
                continue;
            }

            let close = parse_number(&self.source_id, "4. close", &bar.close)?;
            let volume = bar.volume.as_deref()
                .map(|v| parse_number(&self.source_id, "5. volume", v))
                .transpose()?;

            bars.push(
                Observation::new(
                    instrument.symbol.clone(),
                    date.and_time(chrono::NaiveTime::MIN).and_utc(),
                    close,
                    self.source_id.clone(),
                )?
                .with_volume(volume),
            );
        }

        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct AvResponse {
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(rename = "Time Series (Daily)")]
    daily: Option<BTreeMap<String, DailyBar>>,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "07. latest trading day")]
    latest_trading_day: Option<String>,
    #[serde(rename = "09. change")]
    change: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::sources::{ProviderKind, RateLimitPolicy};
    use crate::types::instrument::AssetClass;

    fn config(base_url: Option<String>, api_key_env: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            id: SourceId::from("alpha_vantage"),
            kind: ProviderKind::AlphaVantage,
            asset_classes: vec![AssetClass::Equity],
            data_types: None,
            api_key_env: api_key_env.map(str::to_string),
            base_url,
            path: None,
            rate_limit: RateLimitPolicy::default(),
            enabled: true,
        }
    }

    fn adapter(server: &MockServer) -> AlphaVantageAdapter {
        AlphaVantageAdapter::new(&config(Some(server.uri()), None), reqwest::Client::new(), "demo")
    }

    #[tokio::test]
    async fn parses_global_quote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("function", "GLOBAL_QUOTE"))
            .and(query_param("apikey", "demo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Global Quote": {
                    "01. symbol": "IBM",
                    "05. price": "191.2500",
                    "06. volume": "3500000",
                    "07. latest trading day": "2024-03-08",
                    "09. change": "-1.2500"
                }
            })))
            .mount(&server)
            .await;

        let obs = adapter(&server)
            .fetch_quote(&Instrument::new("IBM", AssetClass::Equity))
            .await
            .unwrap();

        assert_eq!(obs.price, 191.25);
        assert_eq!(obs.change, Some(-1.25));
        assert_eq!(obs.date(), NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
    }

    #[tokio::test]
    async fn throttle_note_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."
            })))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .fetch_quote(&Instrument::new("IBM", AssetClass::Equity))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn empty_quote_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Global Quote": {} })))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .fetch_quote(&Instrument::new("NOPE", AssetClass::Equity))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn history_is_filtered_to_range_and_sorted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("function", "TIME_SERIES_DAILY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Meta Data": {},
                "Time Series (Daily)": {
                    "2024-03-08": { "4. close": "191.25", "5. volume": "100" },
                    "2024-03-07": { "4. close": "192.50", "5. volume": "100" },
                    "2023-01-03": { "4. close": "140.00", "5. volume": "100" }
                }
            })))
            .mount(&server)
            .await;

        let range = HistoryRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
        };
        let bars = adapter(&server)
            .fetch_history(&Instrument::new("IBM", AssetClass::Equity), range)
            .await
            .unwrap();

        assert_eq!(bars.len(), 2);
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[1].price, 191.25);
    }

    #[test]
    fn missing_key_variable_is_a_config_error() {
        let unset = config(None, Some("SIGNALINFRA_TEST_UNSET_ALPHA_KEY"));
        let err = AlphaVantageAdapter::from_env(&unset, reqwest::Client::new()).err().unwrap();
        assert!(matches!(err, Error::ConfigError(_)));

        let err = AlphaVantageAdapter::from_env(&config(None, None), reqwest::Client::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
