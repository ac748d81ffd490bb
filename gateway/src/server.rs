//! Service state and lifecycle.

use crate::config::Settings;
use crate::proxy::ProxyClient;
use crate::registry::RegistrationStore;
use attestation_tdx::cache::AttestationCache;
use attestation_tdx::chain::ChainVerifier;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

/// Shared application state, built once at startup and passed into the
/// router as explicit dependencies.
pub struct AppState {
    pub registry: Arc<dyn RegistrationStore>,
    pub cache: AttestationCache,
    pub chain: Arc<ChainVerifier>,
    pub proxy: ProxyClient,
}

impl AppState {
    pub fn new(settings: &Settings, registry: Arc<dyn RegistrationStore>) -> Self {
        Self {
            registry,
            cache: AttestationCache::new(settings.attestation_cache_ttl_seconds),
            chain: Arc::new(ChainVerifier::new(settings.chain_config())),
            proxy: ProxyClient::new(settings.proxy_request_timeout_seconds),
        }
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, shutting down");
}
