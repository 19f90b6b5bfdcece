// SPDX-License-Identifier: BUSL-1.1

//! Multi-tenant dispatch server for CloudPRNT-style pull printers.

pub mod audit;
pub mod config;
pub mod configsource;
pub mod error;
pub mod history;
pub mod jobstore;
pub mod model;
pub mod presence;
pub mod registry;
pub mod render;
pub mod state;
pub mod sweeper;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::configsource::{spawn_config_loader, ConfigSource, HttpConfigSource, NoConfigSource};
use crate::registry::RegistryEntry;
use crate::state::AppState;
use crate::sweeper::spawn_sweeper;
use crate::transport::build_router;

/// Run the dispatch server until shutdown.
pub async fn run(config: DispatchConfig) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let shutdown = CancellationToken::new();

    let source: Arc<dyn ConfigSource> = match &config.config_url {
        Some(url) => Arc::new(HttpConfigSource::new(url.clone())),
        None => Arc::new(NoConfigSource),
    };

    let state = Arc::new(AppState::with_config_source(config, shutdown.clone(), Arc::clone(&source)));

    spawn_sweeper(Arc::clone(&state));
    spawn_config_loader(Arc::clone(&state), startup_fallback());
    spawn_shutdown_listener(shutdown.clone());

    tracing::info!(%addr, "dispatch server listening");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    tracing::info!("dispatch server stopped");
    Ok(())
}

/// The in-memory mapping used before the first successful remote fetch, or
/// forever if no `DISPATCH_CONFIG_URL` is configured (§4.H).
fn startup_fallback() -> Vec<RegistryEntry> {
    Vec::new()
}

/// Trigger graceful shutdown on SIGINT or SIGTERM (§4.J).
fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = terminate => tracing::info!("received SIGTERM, shutting down"),
        }
        shutdown.cancel();
    });
}
