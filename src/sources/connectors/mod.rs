pub mod alpha_vantage;
pub mod cftc;
pub mod replay;
pub mod yahoo;

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use crate::error::{Error, Result};
use crate::types::ids::SourceId;

/// Sends a request and decodes the JSON body, mapping transport and status
/// failures onto the provider error taxonomy.
pub(crate) async fn get_json<T: DeserializeOwned>(
    source_id: &SourceId,
    request: RequestBuilder,
) -> Result<T> {
    let response = request.send().await.map_err(|e| {
        Error::UpstreamUnavailable(format!("{}: {}", source_id, e))
    })?;

    let status = response.status();
    if let Some(err) = classify_status(source_id, status) {
        return Err(err);
    }

    let body = response.bytes().await.map_err(|e| {
        Error::UpstreamUnavailable(format!("{}: body read failed: {}", source_id, e))
    })?;

    serde_json::from_slice(&body).map_err(|e| {
        Error::MalformedPayload(format!("{}: {}", source_id, e))
    })
}

pub(crate) fn classify_status(source_id: &SourceId, status: StatusCode) -> Option<Error> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(source_id.clone()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::UpstreamUnavailable(format!("{}: authentication rejected (HTTP {})", source_id, status))
        }
        _ => Error::UpstreamUnavailable(format!("{}: HTTP {}", source_id, status)),
    })
}

/// Parses a numeric field that providers deliver as a string.
pub(crate) fn parse_number(source_id: &SourceId, field: &str, raw: &str) -> Result<f64> {
    let value: f64 = raw.trim().parse().map_err(|_| {
        Error::MalformedPayload(format!("{}: field {} is not numeric: {:?}", source_id, field, raw))
    })?;
    if !value.is_finite() {
        return Err(Error::MalformedPayload(format!("{}: field {} is not finite", source_id, field)));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let id = SourceId::from("p1");
        assert!(classify_status(&id, StatusCode::OK).is_none());
        assert!(matches!(classify_status(&id, StatusCode::TOO_MANY_REQUESTS), Some(Error::RateLimited(_))));
        assert!(matches!(classify_status(&id, StatusCode::BAD_GATEWAY), Some(Error::UpstreamUnavailable(_))));
        assert!(matches!(classify_status(&id, StatusCode::FORBIDDEN), Some(Error::UpstreamUnavailable(msg)) if msg.contains("authentication")));
    }

    #[test]
    fn parse_number_rejects_garbage() {
        let id = SourceId::from("p1");
        assert_eq!(parse_number(&id, "price", " 101.50 ").unwrap(), 101.5);
        assert!(matches!(parse_number(&id, "price", "n/a"), Err(Error::MalformedPayload(_))));
        assert!(matches!(parse_number(&id, "price", "NaN"), Err(Error::MalformedPayload(_))));
    }
}
