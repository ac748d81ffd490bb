//! The attestation gate.
//!
//! Every proxied request passes through here: the gate consults the cache
//! (coalescing concurrent verifications), then either hands back a verified
//! attestation or a structured denial. Verification-subsystem failures are
//! `503`; completed-but-negative verdicts are `403` with a body that
//! enumerates which of the three proofs failed.

use attestation_tdx::cache::{AttestationCache, CachedAttestation};
use attestation_tdx::chain::ChainVerifier;
use attestation_tdx::types::{DcapStatus, Registration};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;

pub const HEADER_VERIFIED: HeaderName = HeaderName::from_static("x-tdx-verified");
pub const HEADER_VERIFICATION_TIME: HeaderName =
    HeaderName::from_static("x-tdx-verification-time");
pub const HEADER_DCAP_STATUS: HeaderName = HeaderName::from_static("x-tdx-dcap-status");
pub const HEADER_CACHE_EXPIRES: HeaderName = HeaderName::from_static("x-tdx-cache-expires");

/// ISO-8601 rendering used in headers and denial bodies.
pub fn iso8601(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The four verification headers stamped on every gated response.
pub fn verification_headers(attestation: &CachedAttestation) -> [(HeaderName, String); 4] {
    [
        (HEADER_VERIFIED, attestation.verified.to_string()),
        (HEADER_VERIFICATION_TIME, iso8601(&attestation.cached_at)),
        (HEADER_DCAP_STATUS, attestation.dcap.status.to_string()),
        (HEADER_CACHE_EXPIRES, iso8601(&attestation.expires_at)),
    ]
}

/// A gate denial, ready to become an HTTP response.
#[derive(Debug)]
pub enum GateError {
    /// The verification subsystem could not produce a verdict.
    ServiceUnavailable { message: String },
    /// Verification completed and the workload is not trustworthy.
    Forbidden {
        attestation: Box<CachedAttestation>,
    },
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "service_unavailable",
                    "message": message,
                })),
            )
                .into_response(),
            GateError::Forbidden { attestation } => {
                let body = Json(json!({
                    "error": "forbidden",
                    "dcap_verified": attestation.dcap.verified,
                    "dcap_status": attestation.dcap.status,
                    "dcap_error": attestation.dcap.error,
                    "provenance_verified": attestation.provenance.verified,
                    "provenance_error": attestation.provenance.error,
                    "measurements_verified": attestation.measurements.verified,
                    "measurements_error": attestation.measurements.error,
                    "cached_at": iso8601(&attestation.cached_at),
                }));

                let mut response = (StatusCode::FORBIDDEN, body).into_response();
                for (name, value) in verification_headers(&attestation) {
                    if let Ok(value) = value.parse() {
                        let _ = response.headers_mut().insert(name, value);
                    }
                }
                response
            }
        }
    }
}

/// Let a request through only with a live, verified attestation.
///
/// Cache misses trigger a verification through the single-flight layer; the
/// verdict (positive or negative) is whatever is live in the cache for the
/// registration's TTL window.
pub async fn attestation_gate(
    registration: &Registration,
    cache: &AttestationCache,
    chain: &Arc<ChainVerifier>,
) -> Result<CachedAttestation, GateError> {
    let verification = {
        let chain = Arc::clone(chain);
        let registration = registration.clone();
        move || async move { chain.verify(&registration, None, None).await }
    };

    let attestation = match cache.get_or_verify(&registration.id, verification).await {
        Ok(attestation) => attestation,
        Err(e) => {
            tracing::error!(app_id = %registration.id, "attestation verification error: {e}");
            return Err(GateError::ServiceUnavailable {
                message: "attestation verification error".to_string(),
            });
        }
    };

    // A quote that could not be fetched is a subsystem failure, not a
    // trust verdict; surface it as unavailability with its cause.
    if attestation.dcap.status == DcapStatus::FetchFailed {
        return Err(GateError::ServiceUnavailable {
            message: attestation
                .dcap
                .error
                .clone()
                .unwrap_or_else(|| "quote fetch failed".to_string()),
        });
    }

    if !attestation.verified {
        tracing::warn!(app_id = %registration.id, "attestation failed");
        return Err(GateError::Forbidden {
            attestation: Box::new(attestation),
        });
    }

    Ok(attestation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attestation_tdx::types::{
        ChainVerificationResult, DcapResult, MeasurementResult, ProvenanceResult,
    };
    use chrono::Duration;

    fn attestation(verified: bool, status: DcapStatus) -> CachedAttestation {
        let now = Utc::now();
        CachedAttestation {
            app_id: "app".to_string(),
            verified,
            dcap: DcapResult {
                verified,
                status,
                tcb_status: None,
                collateral_expiry: None,
                error: None,
            },
            provenance: ProvenanceResult::failure("no_attestation"),
            measurements: MeasurementResult::failure("unconfigured"),
            cached_at: now,
            expires_at: now + Duration::seconds(300),
        }
    }

    #[test]
    fn test_verification_headers_reflect_the_attestation() {
        let attestation = attestation(true, DcapStatus::Ok);
        let headers = verification_headers(&attestation);

        assert_eq!(headers[0].0.as_str(), "x-tdx-verified");
        assert_eq!(headers[0].1, "true");
        assert_eq!(headers[1].1, iso8601(&attestation.cached_at));
        assert_eq!(headers[2].1, "ok");
        assert_eq!(headers[3].1, iso8601(&attestation.expires_at));
    }

    #[test]
    fn test_forbidden_response_carries_headers_and_breakdown() {
        let denial = GateError::Forbidden {
            attestation: Box::new(attestation(false, DcapStatus::Revoked)),
        };
        let response = denial.into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers().get("x-tdx-verified").unwrap(), "false");
        assert_eq!(
            response.headers().get("x-tdx-dcap-status").unwrap(),
            "revoked"
        );
    }

    #[test]
    fn test_service_unavailable_response() {
        let denial = GateError::ServiceUnavailable {
            message: "quote provider unreachable".to_string(),
        };
        let response = denial.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_gate_surfaces_fetch_failure_as_unavailable() {
        let settings = crate::config::Settings {
            dcap_allow_mock: false,
            forge_cli_enabled: false,
            forge_api_base: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let chain = Arc::new(ChainVerifier::new(settings.chain_config()));
        let cache = AttestationCache::new(300);

        let registration: Registration = serde_json::from_str(
            r#"{
                "id": "app",
                "name": "app",
                "image_repository": "ghcr.io/org/app",
                "forge_owner": "org",
                "forge_repo": "app",
                "app_endpoint": "http://127.0.0.1:1",
                "quote_provider_endpoint": "http://127.0.0.1:1"
            }"#,
        )
        .unwrap();

        // Quote fetch fails -> service_unavailable, and the verdict is
        // cached for the TTL window.
        let denial = attestation_gate(&registration, &cache, &chain).await;
        assert!(matches!(
            denial,
            Err(GateError::ServiceUnavailable { .. })
        ));
        assert_eq!(cache.stats().valid_entries, 1);
    }
}
