//! Server lifecycle management
//!
//! Manages the startup and shutdown of all server components:
//! - Audit relay (publisher pool, receiver, subscriber hub)
//! - HTTP server

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cake_api::observability::metrics::build_registry;
use cake_api::{create_router, AppState};
use cake_core::Config;
use cake_relay::{broker, AuditRelay, RelayMetrics};

/// Cake server - owns the relay and the HTTP listener
pub struct CakeServer {
    config: Config,
    cancel: CancellationToken,
}

impl CakeServer {
    /// Create a new server instance
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Start all components and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Cake server...");

        let relay_metrics = RelayMetrics::new();
        let registry = build_registry(&relay_metrics).context("Failed to register metrics")?;

        let broker = broker::from_config(&self.config.broker)?;
        let relay = AuditRelay::start(&self.config, broker, relay_metrics, &self.cancel);

        let router = create_router(AppState {
            audit: relay.sender(),
            hub: relay.hub(),
            registry,
        });

        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .with_context(|| format!("Failed to bind HTTP address {http_address}"))?;
        info!("HTTP server listening on {}", http_address);

        // Cancel everything on the first signal
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, starting graceful shutdown...");
            cancel.cancel();
        });

        let graceful = self.cancel.clone().cancelled_owned();
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!("HTTP server error: {}", e);
        }
        info!("HTTP server shut down gracefully");

        // The server may also stop on its own; make sure the relay follows.
        self.cancel.cancel();
        relay.shutdown().await;

        info!("Cake server shut down complete");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
