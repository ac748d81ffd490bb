//! Build-provenance verification against source-forge attestations.
//!
//! Proves that a registration's container image digest was produced by the
//! expected repository's build workflow and is recorded in a public Sigstore
//! transparency log. Two backends implement one capability and are tried in
//! strict priority:
//!
//! 1. the forge CLI (`gh attestation verify`), which performs full Sigstore
//!    signature verification;
//! 2. the forge REST API, which checks that an attestation bundle exists and
//!    that its predicate names the expected repository. This backend does NOT
//!    verify the DSSE signature; positive results carry the
//!    `unverified_signature_caveat` error string so the caveat is visible to
//!    callers.
//!
//! A missing CLI binary yields the `tool_unavailable` sentinel, which is the
//! only condition that falls through to the API backend.

use crate::types::ProvenanceResult;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::io;
use std::time::Duration;
use tokio::process::Command;

/// Sentinel: the CLI binary is not installed; fall through to the API.
pub const TOOL_UNAVAILABLE: &str = "tool_unavailable";
/// No attestation bundle exists for the digest.
pub const NO_ATTESTATION: &str = "no_attestation";
/// The attestation predicate names a different repository.
pub const REPOSITORY_MISMATCH: &str = "repository_mismatch";
/// The bundle or its DSSE payload could not be decoded.
pub const PARSE_ERROR: &str = "parse_error";
/// Positive API-backend results: the DSSE signature was not checked.
pub const UNVERIFIED_SIGNATURE_CAVEAT: &str = "unverified_signature_caveat";
/// The supplied digest is not 64 lowercase hex characters.
pub const INVALID_DIGEST: &str = "invalid_digest";

const FORGE_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a backend needs to locate and judge one attestation.
#[derive(Debug, Clone, Copy)]
pub struct ProvenanceRequest<'a> {
    /// Normalized digest (`sha256:` + 64 lowercase hex).
    pub image_digest: &'a str,
    /// OCI repository the image lives in; the CLI's artifact reference.
    pub image_repository: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
    pub workflow: Option<&'a str>,
}

/// One capability, two backends.
#[async_trait]
pub trait ProvenanceBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, request: &ProvenanceRequest<'_>) -> ProvenanceResult;
}

/// Ensure the `sha256:` prefix and validate the hex payload.
pub fn normalize_digest(digest: &str) -> Result<String, String> {
    let hex_part = digest.strip_prefix("sha256:").unwrap_or(digest);
    let valid = hex_part.len() == 64
        && hex_part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
        return Err(format!(
            "{INVALID_DIGEST}: expected 64 lowercase hex chars, got {digest:?}"
        ));
    }
    Ok(format!("sha256:{hex_part}"))
}

/// Backend 1: the forge's signed-artifact verification tool.
pub struct ForgeCliBackend {
    tool: String,
}

impl ForgeCliBackend {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

#[async_trait]
impl ProvenanceBackend for ForgeCliBackend {
    fn name(&self) -> &str {
        "cli"
    }

    async fn verify(&self, request: &ProvenanceRequest<'_>) -> ProvenanceResult {
        let artifact = format!("oci://{}@{}", request.image_repository, request.image_digest);

        let mut command = Command::new(&self.tool);
        command.args([
            "attestation",
            "verify",
            &artifact,
            "--owner",
            request.owner,
            "--format",
            "json",
        ]);
        if let Some(workflow) = request.workflow {
            command.args(["--signer-workflow", workflow]);
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return ProvenanceResult::failure(TOOL_UNAVAILABLE);
            }
            Err(e) => return ProvenanceResult::failure(format!("cli invocation failed: {e}")),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return ProvenanceResult::failure(if stderr.is_empty() {
                "verification failed".to_string()
            } else {
                stderr.to_string()
            });
        }

        // Exit code 0 is the verdict; stdout identity fields are best-effort.
        let mut result = ProvenanceResult {
            verified: true,
            signer_identity: None,
            workflow_ref: request.workflow.map(str::to_string),
            build_trigger: None,
            repository: Some(format!("{}/{}", request.owner, request.repo)),
            error: None,
        };

        if let Ok(data) = serde_json::from_slice::<Value>(&output.stdout) {
            let entry = data.get(0).unwrap_or(&data);
            let verification = &entry["verificationResult"];
            result.signer_identity = verification["signedEntityCertificate"]
                ["subjectAlternativeName"]
                .as_str()
                .map(str::to_string);
            if let Some(predicate_type) = verification["statement"]["predicateType"].as_str() {
                result.workflow_ref = Some(predicate_type.to_string());
            }
        }

        result
    }
}

/// Backend 2: the forge REST attestation API.
pub struct ForgeApiBackend {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl ForgeApiBackend {
    pub fn new(api_base: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            token,
        }
    }
}

#[async_trait]
impl ProvenanceBackend for ForgeApiBackend {
    fn name(&self) -> &str {
        "api"
    }

    async fn verify(&self, request: &ProvenanceRequest<'_>) -> ProvenanceResult {
        let url = format!(
            "{}/users/{}/attestations/{}",
            self.api_base, request.owner, request.image_digest
        );

        let mut http_request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .timeout(FORGE_API_TIMEOUT);
        if let Some(token) = &self.token {
            http_request = http_request.bearer_auth(token);
        }

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) => return ProvenanceResult::failure(format!("api_error: {e}")),
        };

        if response.status() == StatusCode::NOT_FOUND {
            return ProvenanceResult::failure(NO_ATTESTATION);
        }
        if !response.status().is_success() {
            return ProvenanceResult::failure(format!("api_error: HTTP {}", response.status()));
        }

        let data: Value = match response.json().await {
            Ok(data) => data,
            Err(e) => return ProvenanceResult::failure(format!("{PARSE_ERROR}: {e}")),
        };

        evaluate_bundle(&data, request.owner, request.repo)
    }
}

/// Judge the first attestation bundle of an API response against the
/// expected repository.
fn evaluate_bundle(data: &Value, owner: &str, repo: &str) -> ProvenanceResult {
    let Some(first) = data["attestations"].as_array().and_then(|a| a.first()) else {
        return ProvenanceResult::failure(NO_ATTESTATION);
    };

    let Some(payload_b64) = first["bundle"]["dsseEnvelope"]["payload"].as_str() else {
        return ProvenanceResult::failure(format!("{PARSE_ERROR}: bundle has no DSSE payload"));
    };

    let payload = match BASE64.decode(payload_b64) {
        Ok(payload) => payload,
        Err(e) => return ProvenanceResult::failure(format!("{PARSE_ERROR}: {e}")),
    };
    let statement: Value = match serde_json::from_slice(&payload) {
        Ok(statement) => statement,
        Err(e) => return ProvenanceResult::failure(format!("{PARSE_ERROR}: {e}")),
    };

    let external = &statement["predicate"]["buildDefinition"]["externalParameters"];
    let workflow = &external["workflow"];
    let repo_ref = workflow["repository"].as_str().unwrap_or("");
    let workflow_ref = workflow["ref"].as_str().map(str::to_string);
    let build_trigger = external["github"]["event_name"].as_str().map(str::to_string);

    let expected = format!("https://github.com/{owner}/{repo}").to_lowercase();
    if !repo_ref.to_lowercase().contains(&expected) {
        return ProvenanceResult {
            verified: false,
            signer_identity: None,
            workflow_ref,
            build_trigger,
            repository: Some(repo_ref.to_string()),
            error: Some(REPOSITORY_MISMATCH.to_string()),
        };
    }

    ProvenanceResult {
        verified: true,
        signer_identity: None, // only the CLI backend surfaces the certificate
        workflow_ref,
        build_trigger,
        repository: Some(repo_ref.to_string()),
        error: Some(UNVERIFIED_SIGNATURE_CAVEAT.to_string()),
    }
}

/// Configuration for build-provenance verification.
#[derive(Debug, Clone)]
pub struct ProvenanceConfig {
    pub api_base: String,
    pub token: Option<String>,
    /// Prefer the CLI backend when the tool is installed.
    pub cli_enabled: bool,
    pub cli_tool: String,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            cli_enabled: true,
            cli_tool: "gh".to_string(),
        }
    }
}

/// Backend selector: CLI first, API on the `tool_unavailable` sentinel.
pub struct ProvenanceVerifier {
    cli: ForgeCliBackend,
    api: ForgeApiBackend,
    cli_enabled: bool,
}

impl ProvenanceVerifier {
    pub fn new(config: ProvenanceConfig) -> Self {
        Self {
            cli: ForgeCliBackend::new(config.cli_tool),
            api: ForgeApiBackend::new(config.api_base, config.token),
            cli_enabled: config.cli_enabled,
        }
    }

    /// Verify the build provenance of an image digest.
    pub async fn verify_image(
        &self,
        image_digest: &str,
        image_repository: &str,
        owner: &str,
        repo: &str,
        workflow: Option<&str>,
    ) -> ProvenanceResult {
        let digest = match normalize_digest(image_digest) {
            Ok(digest) => digest,
            Err(e) => return ProvenanceResult::failure(e),
        };

        let request = ProvenanceRequest {
            image_digest: &digest,
            image_repository,
            owner,
            repo,
            workflow,
        };

        if self.cli_enabled {
            let result = self.cli.verify(&request).await;
            if result.error.as_deref() != Some(TOOL_UNAVAILABLE) {
                return result;
            }
            tracing::debug!("forge CLI not installed, falling back to API backend");
        }

        self.api.verify(&request).await
    }
}
