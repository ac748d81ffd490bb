//! TDX trust gateway binary.

use anyhow::Context;
use std::sync::Arc;
use tdx_gateway::registry::MemoryRegistry;
use tdx_gateway::routes::router;
use tdx_gateway::server::{shutdown_signal, AppState};
use tdx_gateway::Settings;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    info!(
        cache_ttl = settings.attestation_cache_ttl_seconds,
        proxy_timeout = settings.proxy_request_timeout_seconds,
        pccs_url = %settings.pccs_url,
        "starting TDX trust gateway"
    );

    let registry = match MemoryRegistry::from_json_file(&settings.registry_path) {
        Ok(registry) => registry,
        Err(e) => {
            warn!(
                "no registry loaded from {} ({e}); starting with an empty registry",
                settings.registry_path
            );
            MemoryRegistry::new(Vec::new())
        }
    };

    let state = Arc::new(AppState::new(&settings, Arc::new(registry)));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    info!("listening on {}", settings.bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}
