//! TDX DCAP quote verification.
//!
//! Decides whether a quote is cryptographically valid under the Intel DCAP
//! trust root and translates the QVL's numeric verdict into the stable
//! [`DcapStatus`] labels. When the native library cannot be loaded the
//! verifier can fall back to a mock mode that enforces structural checks
//! only; mock results are clearly marked (`mock_ok`) because they carry no
//! cryptographic assurance, and deployments gate the fallback through
//! [`DcapConfig::allow_mock`].

use crate::quote::{self, QuoteError};
use crate::qvl::QvlLoader;
use crate::types::{DcapResult, DcapStatus};
use chrono::Utc;
use std::sync::Arc;

/// Configuration for DCAP verification.
#[derive(Debug, Clone)]
pub struct DcapConfig {
    /// Path of the QVL shared object.
    pub library_path: String,
    /// Permit structural-only mock verification when the QVL is absent.
    pub allow_mock: bool,
}

impl Default for DcapConfig {
    fn default() -> Self {
        Self {
            library_path: "/usr/lib/x86_64-linux-gnu/libsgx_dcap_quoteverify.so".to_string(),
            allow_mock: true,
        }
    }
}

/// TDX DCAP quote verifier backed by Intel's QVL.
pub struct DcapVerifier {
    loader: Arc<QvlLoader>,
    allow_mock: bool,
}

impl DcapVerifier {
    pub fn new(config: DcapConfig) -> Self {
        Self {
            loader: Arc::new(QvlLoader::new(config.library_path)),
            allow_mock: config.allow_mock,
        }
    }

    /// Verify a base64-encoded TDX quote.
    ///
    /// Never fails across this boundary: every failure mode is folded into a
    /// negative [`DcapResult`] with a stable status.
    pub async fn verify_quote(&self, quote_b64: &str) -> DcapResult {
        let quote = match quote::decode(quote_b64) {
            Ok(quote) => quote,
            Err(e) => return DcapResult::failure(DcapStatus::InvalidFormat, e.to_string()),
        };

        if let Err(e) = quote::precheck(&quote) {
            let status = match &e {
                QuoteError::InvalidLength { .. } => DcapStatus::InvalidQuoteLength,
                QuoteError::UnsupportedVersion(_) => DcapStatus::InvalidQuoteVersion,
                QuoteError::InvalidFormat(_) => DcapStatus::InvalidFormat,
            };
            return DcapResult::failure(status, e.to_string());
        }

        let Some(qvl) = self.loader.get() else {
            if self.allow_mock {
                return Self::mock_verify();
            }
            return DcapResult::failure(
                DcapStatus::Error,
                "DCAP library not available and mock verification is disabled",
            );
        };

        // The QVL call blocks on PCCS fetches; keep it off the scheduler.
        let expiration_check_date = Utc::now().timestamp();
        let verdict = tokio::task::spawn_blocking(move || {
            qvl.verify(&quote, expiration_check_date)
        })
        .await;

        let verdict = match verdict {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => return DcapResult::failure(DcapStatus::Error, e.to_string()),
            Err(e) => {
                tracing::error!("DCAP verification worker failed: {e}");
                return DcapResult::failure(
                    DcapStatus::Exception,
                    format!("verification worker failed: {e}"),
                );
            }
        };

        if verdict.return_code != 0 {
            return DcapResult::failure(
                DcapStatus::Error,
                format!("quote verification failed with code: {}", verdict.return_code),
            );
        }

        let (status, tcb_status) = map_verification_result(verdict.verification_result);
        let verified = status == DcapStatus::Ok;

        DcapResult {
            verified,
            status,
            tcb_status: Some(tcb_status.to_string()),
            collateral_expiry: None,
            error: if verified {
                None
            } else {
                Some(format!("verification status: {status}"))
            },
        }
    }

    /// Structural validation only; used when the QVL is absent and mock mode
    /// is permitted.
    fn mock_verify() -> DcapResult {
        tracing::warn!("DCAP library not available - using mock verification");
        DcapResult {
            verified: true,
            status: DcapStatus::MockOk,
            tcb_status: Some("mock".to_string()),
            collateral_expiry: None,
            error: Some(
                "DCAP library not available - structural validation only".to_string(),
            ),
        }
    }

    /// Whether real (non-mock) verification is possible on this host.
    pub fn is_available(&self) -> bool {
        self.loader.is_available()
    }
}

/// Map an `sgx_ql_qv_result_t` value to a status and its parallel TCB label.
fn map_verification_result(code: u32) -> (DcapStatus, &'static str) {
    match code {
        0 => (DcapStatus::Ok, "up_to_date"),
        1 => (DcapStatus::ConfigNeeded, "configuration_needed"),
        2 => (DcapStatus::OutOfDate, "out_of_date"),
        3 => (
            DcapStatus::OutOfDateConfigNeeded,
            "out_of_date_configuration_needed",
        ),
        4 => (DcapStatus::InvalidSignature, "unknown"),
        5 => (DcapStatus::Revoked, "revoked"),
        6 => (DcapStatus::Unspecified, "unknown"),
        _ => (DcapStatus::Unknown, "unknown"),
    }
}
