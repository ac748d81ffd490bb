//! Full-chain verification orchestration.
//!
//! One call runs the three independent proofs for a registration:
//! DCAP quote validity, build provenance, and measurement baseline
//! comparison. Sub-results never short-circuit each other and the
//! orchestrator never fails across its boundary; everything surfaces in the
//! combined [`ChainVerificationResult`].

use crate::dcap::{DcapConfig, DcapVerifier};
use crate::measurement::{MeasurementVerifier, EXTRACTION_FAILED};
use crate::provenance::{ProvenanceConfig, ProvenanceVerifier};
use crate::provider::QuoteProviderClient;
use crate::quote;
use crate::types::{
    ChainVerificationResult, DcapResult, DcapStatus, MeasurementResult, ProvenanceResult,
    Registration, TdxMeasurements,
};

/// Registrations without an image digest cannot be provenance-checked.
pub const NO_IMAGE_DIGEST: &str = "no_image_digest";

/// Configuration for the whole verification chain.
#[derive(Debug, Clone, Default)]
pub struct ChainConfig {
    pub dcap: DcapConfig,
    pub provenance: ProvenanceConfig,
    pub measurement: MeasurementSettings,
}

/// Measurement-comparison policy knobs.
#[derive(Debug, Clone)]
pub struct MeasurementSettings {
    pub skip_rtmr3: bool,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self { skip_rtmr3: true }
    }
}

/// Orchestrates DCAP, provenance, and measurement verification.
pub struct ChainVerifier {
    dcap: DcapVerifier,
    provenance: ProvenanceVerifier,
    measurement: MeasurementVerifier,
    provider: QuoteProviderClient,
}

impl ChainVerifier {
    pub fn new(config: ChainConfig) -> Self {
        Self {
            dcap: DcapVerifier::new(config.dcap),
            provenance: ProvenanceVerifier::new(config.provenance),
            measurement: MeasurementVerifier {
                skip_rtmr3: config.measurement.skip_rtmr3,
            },
            provider: QuoteProviderClient::new(),
        }
    }

    /// Run the full chain for one registration.
    ///
    /// Without a caller-supplied quote the registration's quote provider is
    /// asked for one (bound to `report_data` when given). A failed fetch is
    /// terminal: nothing can be verified without a quote, so the DCAP slot
    /// carries `fetch_failed` and the other two record the same root cause.
    pub async fn verify(
        &self,
        registration: &Registration,
        quote_b64: Option<String>,
        report_data: Option<&str>,
    ) -> ChainVerificationResult {
        let mut provider_measurements: Option<TdxMeasurements> = None;

        let quote_b64 = match quote_b64 {
            Some(quote_b64) => quote_b64,
            None => {
                match self
                    .provider
                    .fetch_quote(&registration.quote_provider_endpoint, report_data)
                    .await
                {
                    Ok((quote_b64, measurements)) => {
                        provider_measurements = Some(measurements);
                        quote_b64
                    }
                    Err(e) => {
                        tracing::error!(app_id = %registration.id, "failed to fetch quote: {e}");
                        let cause = format!("failed to fetch quote: {e}");
                        return ChainVerificationResult {
                            dcap: DcapResult::failure(DcapStatus::FetchFailed, cause.clone()),
                            provenance: ProvenanceResult::failure(format!("skipped: {cause}")),
                            measurements: MeasurementResult::failure(format!("skipped: {cause}")),
                        };
                    }
                }
            }
        };

        // DCAP is FFI/worker-bound, provenance suspends on the network; run
        // them concurrently. Measurement comparison needs the parsed
        // registers and runs after.
        let (dcap, provenance) = tokio::join!(
            self.dcap.verify_quote(&quote_b64),
            self.verify_provenance(registration),
        );

        let measurements =
            self.verify_measurements(registration, &quote_b64, provider_measurements);

        let result = ChainVerificationResult {
            dcap,
            provenance,
            measurements,
        };

        tracing::info!(
            app_id = %registration.id,
            status = %result.classification(),
            dcap = %result.dcap.status,
            provenance = result.provenance.verified,
            measurements = result.measurements.verified,
            "chain verification complete"
        );

        result
    }

    async fn verify_provenance(&self, registration: &Registration) -> ProvenanceResult {
        let Some(image_digest) = &registration.image_digest else {
            return ProvenanceResult::failure(NO_IMAGE_DIGEST);
        };

        self.provenance
            .verify_image(
                image_digest,
                &registration.image_repository,
                &registration.forge_owner,
                &registration.forge_repo,
                registration.forge_workflow_path.as_deref(),
            )
            .await
    }

    fn verify_measurements(
        &self,
        registration: &Registration,
        quote_b64: &str,
        provider_measurements: Option<TdxMeasurements>,
    ) -> MeasurementResult {
        let actual = match provider_measurements {
            Some(measurements) => measurements,
            None => match quote::extract_from_base64(quote_b64) {
                Ok(measurements) => measurements,
                Err(e) => {
                    return MeasurementResult::failure(format!("{EXTRACTION_FAILED}: {e}"));
                }
            },
        };

        self.measurement
            .verify_against_baseline(registration, &actual)
    }
}
