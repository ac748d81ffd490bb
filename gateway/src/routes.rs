//! HTTP surface: health, on-demand verification, per-app diagnostics, and
//! the attestation-gated reverse proxy.

use crate::gate::{attestation_gate, verification_headers, iso8601};
use crate::proxy::filter_request_headers;
use crate::server::AppState;
use attestation_tdx::types::Registration;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Assemble the full router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/verify/:app_id", post(verify_app))
        .route("/:app_id/_status", get(app_status))
        .route("/:app_id", any(proxy_root))
        .route("/:app_id/*tail", any(proxy_tail))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "tdx-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn unknown_app(app_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "unknown_app",
            "message": format!("application {app_id} not found"),
        })),
    )
        .into_response()
}

fn lookup(state: &AppState, app_id: &str) -> Result<Registration, Response> {
    state.registry.get(app_id).ok_or_else(|| unknown_app(app_id))
}

/// Diagnostic view of an app's cached attestation. Never triggers a fresh
/// verification.
async fn app_status(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
) -> Response {
    let registration = match lookup(&state, &app_id) {
        Ok(registration) => registration,
        Err(response) => return response,
    };

    let cached = state.cache.get(&app_id);

    Json(json!({
        "app_id": app_id,
        "app_name": registration.name,
        "app_endpoint": registration.app_endpoint,
        "quote_provider_endpoint": registration.quote_provider_endpoint,
        "attestation_cached": cached.is_some(),
        "attestation_verified": cached.as_ref().map(|c| c.verified),
        "attestation_cached_at": cached.as_ref().map(|c| iso8601(&c.cached_at)),
        "attestation_expires_at": cached.as_ref().map(|c| iso8601(&c.expires_at)),
        "dcap_status": cached.as_ref().map(|c| c.dcap.status),
        "provenance_verified": cached.as_ref().map(|c| c.provenance.verified),
        "measurements_verified": cached.as_ref().map(|c| c.measurements.verified),
        "cache_stats": state.cache.stats(),
    }))
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct VerifyRequest {
    quote_base64: Option<String>,
    report_data: Option<String>,
}

/// On-demand full-chain verification, bypassing the cache.
async fn verify_app(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    body: Option<Json<VerifyRequest>>,
) -> Response {
    let registration = match lookup(&state, &app_id) {
        Ok(registration) => registration,
        Err(response) => return response,
    };

    let request = body.map(|Json(request)| request).unwrap_or_default();
    let started = Instant::now();

    let result = state
        .chain
        .verify(
            &registration,
            request.quote_base64,
            request.report_data.as_deref(),
        )
        .await;

    Json(json!({
        "app_id": app_id,
        "status": result.classification(),
        "verified": result.verified(),
        "dcap": result.dcap,
        "provenance": result.provenance,
        "measurements": result.measurements,
        "duration_ms": started.elapsed().as_millis() as u64,
    }))
    .into_response()
}

async fn proxy_root(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    request: Request,
) -> Response {
    proxy(state, app_id, String::new(), request).await
}

async fn proxy_tail(
    State(state): State<Arc<AppState>>,
    Path((app_id, tail)): Path<(String, String)>,
    request: Request,
) -> Response {
    proxy(state, app_id, tail, request).await
}

/// The attestation-gated forward path.
async fn proxy(
    state: Arc<AppState>,
    app_id: String,
    tail: String,
    request: Request,
) -> Response {
    let registration = match lookup(&state, &app_id) {
        Ok(registration) => registration,
        Err(response) => return response,
    };

    let attestation = match attestation_gate(&registration, &state.cache, &state.chain).await {
        Ok(attestation) => attestation,
        Err(denial) => return denial.into_response(),
    };

    let mut target = format!("{}/{}", registration.app_endpoint, tail);
    if let Some(query) = request.uri().query() {
        target = format!("{target}?{query}");
    }

    let method = request.method().clone();
    let headers = filter_request_headers(request.headers());
    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "invalid_body",
                    "message": e.to_string(),
                })),
            )
                .into_response();
        }
    };

    match state.proxy.forward(method, &target, headers, body).await {
        Ok((status, headers, body)) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            // Stamp last so an upstream cannot spoof verification headers.
            for (name, value) in verification_headers(&attestation) {
                if let Ok(value) = value.parse() {
                    let _ = response.headers_mut().insert(name, value);
                }
            }
            response
        }
        Err(e) => e.into_response(),
    }
}
