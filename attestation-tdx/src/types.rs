//! Core types shared across the attestation verification stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// TDX measurement registers, rendered as 96-char lowercase hex strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TdxMeasurements {
    /// Static trust-domain measurement taken at launch (48 bytes).
    pub mrtd: String,
    /// Runtime measurement register 0.
    pub rtmr0: String,
    /// Runtime measurement register 1.
    pub rtmr1: String,
    /// Runtime measurement register 2.
    pub rtmr2: String,
    /// Runtime measurement register 3 (commonly extended at runtime).
    pub rtmr3: String,
}

/// Stable DCAP verification status labels.
///
/// Codes 0..=6 mirror the QVL's `sgx_ql_qv_result_t` verdicts; the remaining
/// variants cover the structural and operational failure paths of the
/// verifier itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DcapStatus {
    Ok,
    MockOk,
    ConfigNeeded,
    OutOfDate,
    OutOfDateConfigNeeded,
    InvalidSignature,
    Revoked,
    Unspecified,
    Unknown,
    Error,
    Exception,
    InvalidFormat,
    InvalidQuoteLength,
    InvalidQuoteVersion,
    FetchFailed,
}

impl DcapStatus {
    /// The stable snake_case label, safe to log and compare.
    pub fn as_str(&self) -> &'static str {
        match self {
            DcapStatus::Ok => "ok",
            DcapStatus::MockOk => "mock_ok",
            DcapStatus::ConfigNeeded => "config_needed",
            DcapStatus::OutOfDate => "out_of_date",
            DcapStatus::OutOfDateConfigNeeded => "out_of_date_config_needed",
            DcapStatus::InvalidSignature => "invalid_signature",
            DcapStatus::Revoked => "revoked",
            DcapStatus::Unspecified => "unspecified",
            DcapStatus::Unknown => "unknown",
            DcapStatus::Error => "error",
            DcapStatus::Exception => "exception",
            DcapStatus::InvalidFormat => "invalid_format",
            DcapStatus::InvalidQuoteLength => "invalid_quote_length",
            DcapStatus::InvalidQuoteVersion => "invalid_quote_version",
            DcapStatus::FetchFailed => "fetch_failed",
        }
    }
}

impl fmt::Display for DcapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of DCAP quote verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcapResult {
    pub verified: bool,
    pub status: DcapStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcb_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collateral_expiry: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DcapResult {
    /// A negative result carrying only a status and an error string.
    pub fn failure(status: DcapStatus, error: impl Into<String>) -> Self {
        Self {
            verified: false,
            status,
            tcb_status: None,
            collateral_expiry: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of build-provenance verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvenanceResult {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_trigger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProvenanceResult {
    /// A negative result carrying only an error string.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            verified: false,
            signer_identity: None,
            workflow_ref: None,
            build_trigger: None,
            repository: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of measurement comparison against a registration baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub verified: bool,
    pub mrtd_match: bool,
    pub rtmr0_match: bool,
    pub rtmr1_match: bool,
    pub rtmr2_match: bool,
    pub rtmr3_match: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<TdxMeasurements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<TdxMeasurements>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MeasurementResult {
    /// A negative result with no match bits set.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            verified: false,
            mrtd_match: false,
            rtmr0_match: false,
            rtmr1_match: false,
            rtmr2_match: false,
            rtmr3_match: false,
            actual: None,
            expected: None,
            error: Some(error.into()),
        }
    }
}

/// Overall classification of a chain verification, for logging and the
/// on-demand verification response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// All three sub-results verified.
    Success,
    /// Some, but not all, sub-results verified.
    Partial,
    /// No sub-result verified.
    Failed,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStatus::Success => write!(f, "success"),
            VerificationStatus::Partial => write!(f, "partial"),
            VerificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Combined result of the three-part verification chain.
///
/// Each sub-result is surfaced even when another failed; there is no
/// short-circuiting anywhere in the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerificationResult {
    pub dcap: DcapResult,
    pub provenance: ProvenanceResult,
    pub measurements: MeasurementResult,
}

impl ChainVerificationResult {
    /// True iff every sub-result verified.
    pub fn verified(&self) -> bool {
        self.dcap.verified && self.provenance.verified && self.measurements.verified
    }

    /// Overall status: `success` iff all verified, `failed` iff none,
    /// `partial` otherwise.
    pub fn classification(&self) -> VerificationStatus {
        let passes = [
            self.dcap.verified,
            self.provenance.verified,
            self.measurements.verified,
        ]
        .iter()
        .filter(|v| **v)
        .count();

        match passes {
            3 => VerificationStatus::Success,
            0 => VerificationStatus::Failed,
            _ => VerificationStatus::Partial,
        }
    }
}

/// A registered TDX application: the intended identity of a workload.
///
/// Registration management (CRUD, persistence) lives outside this crate; the
/// verification stack only reads these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Opaque registration id, also the proxy path prefix.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// OCI repository the image is published to (e.g. `ghcr.io/org/app`).
    pub image_repository: String,
    #[serde(default = "default_image_tag")]
    pub image_tag: String,
    /// Image digest (`sha256:` + 64 lowercase hex); provenance verification
    /// is skipped without it.
    #[serde(default)]
    pub image_digest: Option<String>,
    /// Source-forge owner (org or user).
    pub forge_owner: String,
    /// Source-forge repository name.
    pub forge_repo: String,
    /// Workflow path expected to have produced the build.
    #[serde(default)]
    pub forge_workflow_path: Option<String>,
    /// Upstream application base URL, no trailing slash.
    pub app_endpoint: String,
    /// Quote-provider sidecar base URL.
    pub quote_provider_endpoint: String,
    /// Baseline measurements captured from a trusted deployment
    /// (96 lowercase hex chars each). Without `expected_mrtd` the
    /// measurement check reports `unconfigured`.
    #[serde(default)]
    pub expected_mrtd: Option<String>,
    #[serde(default)]
    pub expected_rtmr0: Option<String>,
    #[serde(default)]
    pub expected_rtmr1: Option<String>,
    #[serde(default)]
    pub expected_rtmr2: Option<String>,
    #[serde(default)]
    pub expected_rtmr3: Option<String>,
}

fn default_image_tag() -> String {
    "latest".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dcap_status_labels() {
        assert_eq!(DcapStatus::Ok.to_string(), "ok");
        assert_eq!(DcapStatus::MockOk.to_string(), "mock_ok");
        assert_eq!(DcapStatus::FetchFailed.to_string(), "fetch_failed");
        assert_eq!(
            DcapStatus::OutOfDateConfigNeeded.to_string(),
            "out_of_date_config_needed"
        );
    }

    #[test]
    fn test_classification() {
        let mut result = ChainVerificationResult {
            dcap: DcapResult {
                verified: true,
                status: DcapStatus::Ok,
                tcb_status: None,
                collateral_expiry: None,
                error: None,
            },
            provenance: ProvenanceResult {
                verified: true,
                signer_identity: None,
                workflow_ref: None,
                build_trigger: None,
                repository: None,
                error: None,
            },
            measurements: MeasurementResult::failure("unconfigured"),
        };
        assert_eq!(result.classification(), VerificationStatus::Partial);
        assert!(!result.verified());

        result.measurements.verified = true;
        assert_eq!(result.classification(), VerificationStatus::Success);
        assert!(result.verified());

        result.dcap.verified = false;
        result.provenance.verified = false;
        result.measurements.verified = false;
        assert_eq!(result.classification(), VerificationStatus::Failed);
    }

    #[test]
    fn test_registration_defaults() {
        let json = r#"{
            "id": "app-1",
            "name": "demo",
            "image_repository": "ghcr.io/org/demo",
            "forge_owner": "org",
            "forge_repo": "demo",
            "app_endpoint": "http://10.0.0.5:8080",
            "quote_provider_endpoint": "http://10.0.0.5:8081"
        }"#;
        let reg: Registration = serde_json::from_str(json).unwrap();
        assert_eq!(reg.image_tag, "latest");
        assert!(reg.image_digest.is_none());
        assert!(reg.expected_mrtd.is_none());
    }
}
