//! Header-faithful request forwarding.
//!
//! Hop-by-hop headers are stripped in both directions; on the way back the
//! framing headers (`content-length`, `content-encoding`) are dropped too so
//! the server adapter recomputes them for the possibly re-framed body.
//! Bodies pass through unmodified. Redirects are followed by the upstream
//! client (the default reqwest policy); this is operational behavior, not a
//! security property.

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Headers never forwarded to the upstream application.
pub const SKIP_REQUEST_HEADERS: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Headers never returned from the upstream response.
pub const SKIP_RESPONSE_HEADERS: [&str; 11] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-encoding",
    "content-length",
];

/// Drop the hop-by-hop set from an incoming request's headers.
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    filter_headers(headers, &SKIP_REQUEST_HEADERS)
}

/// Drop the hop-by-hop and framing sets from an upstream response's headers.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    filter_headers(headers, &SKIP_RESPONSE_HEADERS)
}

fn filter_headers(headers: &HeaderMap, skip: &[&str]) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers {
        if !skip.contains(&name.as_str()) {
            // append, not insert: repeated headers (e.g. set-cookie) survive
            let _ = filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request to {target} timed out")]
    Timeout { target: String },

    #[error("upstream request to {target} failed: {message}")]
    Upstream { target: String, message: String },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (error, message, target) = match self {
            ProxyError::Timeout { target } => (
                "upstream_timeout",
                "upstream request timed out".to_string(),
                target,
            ),
            ProxyError::Upstream { target, message } => ("upstream_error", message, target),
        };
        (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": error,
                "message": message,
                "target": target,
            })),
        )
            .into_response()
    }
}

/// Shared, connection-pooled client for upstream forwarding.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
    timeout: Duration,
}

impl ProxyClient {
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            client: Client::new(),
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    /// Forward one request and collect the filtered upstream response.
    pub async fn forward(
        &self,
        method: Method,
        target_url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes), ProxyError> {
        tracing::debug!("proxying {method} {target_url}");

        let response = self
            .client
            .request(method, target_url)
            .headers(headers)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    tracing::error!("timeout proxying to {target_url}");
                    ProxyError::Timeout {
                        target: target_url.to_string(),
                    }
                } else {
                    tracing::error!("error proxying to {target_url}: {e}");
                    ProxyError::Upstream {
                        target: target_url.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let headers = filter_response_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream {
                target: target_url.to_string(),
                message: format!("failed to read upstream body: {e}"),
            })?;

        Ok((status, headers, body))
    }
}
