//! HTTP client for the TDX quote-provider sidecar.
//!
//! The provider exposes `GET /quote` (fresh quote plus parsed measurements)
//! and accepts `POST /quote` with `{"reportData": base64}` to bind the quote
//! to caller-supplied report data. One attempt per verification; the chain
//! never retries.

use crate::types::TdxMeasurements;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Quote generation can take a while inside a busy trust domain.
const QUOTE_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("quote provider error: HTTP {0}")]
    Api(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote: String,
    #[allow(dead_code)]
    #[serde(default)]
    quote_size: Option<u64>,
    measurements: TdxMeasurements,
}

/// Client for a registration's quote-provider endpoint.
pub struct QuoteProviderClient {
    client: Client,
}

impl QuoteProviderClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Fetch a quote and its parsed measurements.
    ///
    /// With `report_data` the quote is bound to the supplied 64-byte
    /// base64-encoded value via `POST /quote`.
    pub async fn fetch_quote(
        &self,
        provider_url: &str,
        report_data: Option<&str>,
    ) -> Result<(String, TdxMeasurements), ProviderError> {
        let url = format!("{provider_url}/quote");

        let request = match report_data {
            Some(report_data) => self
                .client
                .post(&url)
                .json(&json!({ "reportData": report_data })),
            None => self.client.get(&url),
        };

        let response = request.timeout(QUOTE_FETCH_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(ProviderError::Api(response.status()));
        }

        let body: QuoteResponse = response.json().await?;
        Ok((body.quote, body.measurements))
    }

    /// Fetch the current measurement registers alone.
    pub async fn fetch_measurements(
        &self,
        provider_url: &str,
    ) -> Result<TdxMeasurements, ProviderError> {
        let (_, measurements) = self.fetch_quote(provider_url, None).await?;
        Ok(measurements)
    }
}

impl Default for QuoteProviderClient {
    fn default() -> Self {
        Self::new()
    }
}
