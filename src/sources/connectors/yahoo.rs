//! Yahoo Finance v8 chart API.
//!
//! No authentication. Serves the latest quote from the chart metadata and
//! daily closes for history. Non-trading days come back as null closes and
//! are skipped; any structural gap in the response is a malformed payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use crate::error::{Error, Result};
use crate::sources::adapter::{HistoryRange, SourceAdapter};
use crate::sources::connectors::get_json;
use crate::sources::{Capabilities, ProviderConfig};
use crate::types::ids::SourceId;
use crate::types::instrument::Instrument;
use crate::types::observation::Observation;

const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com";

pub struct YahooAdapter {
    source_id: SourceId,
    capabilities: Capabilities,
    base_url: String,
    client: reqwest::Client,
}

impl YahooAdapter {
    pub fn new(config: &ProviderConfig, client: reqwest::Client) -> Self {
        YahooAdapter {
            source_id: config.id.clone(),
            capabilities: config.capabilities(),
            base_url: config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client,
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!("{}/v8/finance/chart/{}", self.base_url.trim_end_matches('/'), symbol)
    }

    async fn chart(&self, symbol: &str, query: &[(&str, String)]) -> Result<ChartData> {
        let request = self.client.get(self.chart_url(symbol)).query(query);
        let response: ChartResponse = get_json(&self.source_id, request).await?;

        if let Some(err) = response.chart.error {
            return Err(Error::UpstreamUnavailable(format!(
                "{}: {} {}",
                self.source_id, err.code, err.description
            )));
        }

        response.chart.result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| Error::MalformedPayload(format!("{}: empty chart result", self.source_id)))
    }
}

#[async_trait]
impl SourceAdapter for YahooAdapter {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn fetch_quote(&self, instrument: &Instrument) -> Result<Observation> {
        let symbol = instrument.symbol_for(&self.source_id);
        let data = self.chart(symbol, &[
            ("range", "5d".to_string()),
            ("interval", "1d".to_string()),
        ]).await?;

        let meta = data.meta;
        let price = meta.regular_market_price.ok_or_else(|| {
            Error::MalformedPayload(format!("{}: no regularMarketPrice for {}", self.source_id, symbol))
        })?;
        let timestamp = meta.regular_market_time
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| {
                Error::MalformedPayload(format!("{}: no regularMarketTime for {}", self.source_id, symbol))
            })?;
        let change = meta.chart_previous_close.map(|prev| price - prev);

        Ok(Observation::new(instrument.symbol.clone(), timestamp, price, self.source_id.clone())?
            .with_change(change)
            .with_volume(meta.regular_market_volume))
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        range: HistoryRange,
    ) -> Result<Vec<Observation>> {
        let symbol = instrument.symbol_for(&self.source_id);
        let start = range.start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
        let end = range.end.and_time(chrono::NaiveTime::MIN).and_utc().timestamp() + 86_399;

        let data = self.chart(symbol, &[
            ("period1", start.to_string()),
            ("period2", end.to_string()),
            ("interval", "1d".to_string()),
        ]).await?;

        let timestamps = data.timestamp.ok_or_else(|| {
            Error::MalformedPayload(format!("{}: no timestamps for {}", self.source_id, symbol))
        })?;
        let quote = data.indicators.quote.into_iter().next().ok_or_else(|| {
            Error::MalformedPayload(format!("{}: no quote block for {}", self.source_id, symbol))
        })?;
        if quote.close.len() != timestamps.len() {
            return Err(Error::MalformedPayload(format!(
                "{}: {} timestamps but {} closes for {}",
                self.source_id, timestamps.len(), quote.close.len(), symbol
            )));
        }

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            // null close marks a non-trading day
            let Some(close) = quote.close[i] else {
                continue;
            };
            let timestamp: DateTime<Utc> = DateTime::from_timestamp(*ts, 0).ok_or_else(|| {
                Error::MalformedPayload(format!("{}: invalid timestamp {}", self.source_id, ts))
            })?;
            let volume = quote.volume.get(i).copied().flatten();

            bars.push(
                Observation::new(instrument.symbol.clone(), timestamp, close, self.source_id.clone())?
                    .with_volume(volume),
            );
        }

        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_time: Option<i64>,
    regular_market_volume: Option<f64>,
    chart_previous_close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use crate::sources::{ProviderKind, RateLimitPolicy};
    use crate::types::instrument::AssetClass;

    fn adapter(server: &MockServer) -> YahooAdapter {
        let config = ProviderConfig {
            id: SourceId::from("yahoo"),
            kind: ProviderKind::Yahoo,
            asset_classes: vec![AssetClass::Equity, AssetClass::Commodity],
            data_types: None,
            api_key_env: None,
            base_url: Some(server.uri()),
            path: None,
            rate_limit: RateLimitPolicy::default(),
            enabled: true,
        };
        YahooAdapter::new(&config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn quote_uses_alias_and_computes_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/GC=F"))
            .and(query_param("range", "5d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": {
                    "result": [{
                        "meta": {
                            "regularMarketPrice": 2051.5,
                            "regularMarketTime": 1_709_856_000,
                            "regularMarketVolume": 1200.0,
                            "chartPreviousClose": 2041.5
                        },
                        "timestamp": [],
                        "indicators": { "quote": [{ "close": [] }] }
                    }],
                    "error": null
                }
            })))
            .mount(&server)
            .await;

        let gold = Instrument::new("GOLD", AssetClass::Commodity).with_alias("yahoo", "GC=F");
        let obs = adapter(&server).fetch_quote(&gold).await.unwrap();

        assert_eq!(obs.symbol.as_str(), "GOLD");
        assert_eq!(obs.price, 2051.5);
        assert_eq!(obs.change, Some(10.0));
        assert_eq!(obs.source, SourceId::from("yahoo"));
    }

    #[tokio::test]
    async fn history_skips_null_closes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/SPY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": {
                    "result": [{
                        "meta": {},
                        "timestamp": [1_704_153_600, 1_704_240_000, 1_704_326_400],
                        "indicators": { "quote": [{
                            "close": [470.1, null, 472.3],
                            "volume": [100.0, null, 120.0]
                        }] }
                    }],
                    "error": null
                }
            })))
            .mount(&server)
            .await;

        let range = HistoryRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        };
        let bars = adapter(&server)
            .fetch_history(&Instrument::new("SPY", AssetClass::Equity), range)
            .await
            .unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].price, 472.3);
    }

    #[tokio::test]
    async fn mismatched_arrays_are_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "chart": {
                    "result": [{
                        "meta": {},
                        "timestamp": [1_704_153_600, 1_704_240_000],
                        "indicators": { "quote": [{ "close": [470.1] }] }
                    }],
                    "error": null
                }
            })))
            .mount(&server)
            .await;

        let range = HistoryRange {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        };
        let err = adapter(&server)
            .fetch_history(&Instrument::new("SPY", AssetClass::Equity), range)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
    }

    #[tokio::test]
    async fn http_errors_are_typed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/SPY"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/QQQ"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let yahoo = adapter(&server);
        let limited = yahoo.fetch_quote(&Instrument::new("SPY", AssetClass::Equity)).await;
        let down = yahoo.fetch_quote(&Instrument::new("QQQ", AssetClass::Equity)).await;

        assert!(matches!(limited, Err(Error::RateLimited(_))));
        assert!(matches!(down, Err(Error::UpstreamUnavailable(_))));
    }
}
