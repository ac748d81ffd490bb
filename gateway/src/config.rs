//! Environment-driven gateway settings.
//!
//! Configuration management beyond plain environment variables is an
//! external concern; this module only materializes the knobs the gateway
//! core needs, with deployment-friendly defaults.

use attestation_tdx::chain::{ChainConfig, MeasurementSettings};
use attestation_tdx::dcap::DcapConfig;
use attestation_tdx::provenance::ProvenanceConfig;
use std::env;

/// Gateway settings, loaded from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Listen address for the HTTP surface.
    pub bind_addr: String,
    /// JSON file the registration registry is seeded from.
    pub registry_path: String,
    /// TTL applied to cached verdicts, positive and negative alike.
    pub attestation_cache_ttl_seconds: u64,
    /// Upstream forwarding timeout.
    pub proxy_request_timeout_seconds: u64,
    /// Path of the QVL shared object.
    pub dcap_library_path: String,
    /// Permit structural-only mock DCAP verification when the QVL is absent.
    pub dcap_allow_mock: bool,
    /// PCCS the QVL fetches collateral from (resolved through the QVL's own
    /// QCNL configuration; recorded here for operators).
    pub pccs_url: String,
    /// Forge API token; anonymous access suffices for public repositories.
    pub forge_token: Option<String>,
    /// Forge REST API base URL.
    pub forge_api_base: String,
    /// Prefer the forge CLI backend for provenance verification.
    pub forge_cli_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            registry_path: "registrations.json".to_string(),
            attestation_cache_ttl_seconds: 300,
            proxy_request_timeout_seconds: 30,
            dcap_library_path: "/usr/lib/x86_64-linux-gnu/libsgx_dcap_quoteverify.so".to_string(),
            dcap_allow_mock: true,
            pccs_url: "https://localhost:8081".to_string(),
            forge_token: None,
            forge_api_base: "https://api.github.com".to_string(),
            forge_cli_enabled: true,
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("BIND_ADDR", defaults.bind_addr),
            registry_path: env_or("REGISTRY_PATH", defaults.registry_path),
            attestation_cache_ttl_seconds: env_parsed(
                "ATTESTATION_CACHE_TTL_SECONDS",
                defaults.attestation_cache_ttl_seconds,
            ),
            proxy_request_timeout_seconds: env_parsed(
                "PROXY_REQUEST_TIMEOUT_SECONDS",
                defaults.proxy_request_timeout_seconds,
            ),
            dcap_library_path: env_or("DCAP_LIBRARY_PATH", defaults.dcap_library_path),
            dcap_allow_mock: env_parsed("DCAP_ALLOW_MOCK", defaults.dcap_allow_mock),
            pccs_url: env_or("PCCS_URL", defaults.pccs_url),
            forge_token: env::var("FORGE_TOKEN").ok().filter(|t| !t.is_empty()),
            forge_api_base: env_or("FORGE_API_BASE", defaults.forge_api_base),
            forge_cli_enabled: env_parsed("FORGE_CLI_ENABLED", defaults.forge_cli_enabled),
        }
    }

    /// The verification-chain configuration these settings describe.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            dcap: DcapConfig {
                library_path: self.dcap_library_path.clone(),
                allow_mock: self.dcap_allow_mock,
            },
            provenance: ProvenanceConfig {
                api_base: self.forge_api_base.clone(),
                token: self.forge_token.clone(),
                cli_enabled: self.forge_cli_enabled,
                ..Default::default()
            },
            measurement: MeasurementSettings::default(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
