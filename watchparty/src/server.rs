//! Server lifecycle management
//!
//! Runs the HTTP/WebSocket server and the idle-session sweep, and stops both
//! on SIGINT/SIGTERM.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use watchparty_api::{create_router, AppState, SyncService};
use watchparty_core::Config;

pub struct WatchPartyServer {
    config: Config,
    sync_service: SyncService,
}

impl WatchPartyServer {
    pub const fn new(config: Config, sync_service: SyncService) -> Self {
        Self {
            config,
            sync_service,
        }
    }

    /// Start all components and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let eviction_handle = self.start_eviction_task(shutdown_rx.clone());
        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        info!("All servers started successfully");

        let http_running = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                false
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                true
            }
        };

        // Signal all components to shut down
        let _ = shutdown_tx.send(true);

        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        if http_running && tokio::time::timeout(grace, http_handle).await.is_err() {
            warn!(
                connections = self.sync_service.hub().connection_count(),
                "Grace period elapsed with connections still open"
            );
        }
        let _ = eviction_handle.await;

        info!("WatchParty server stopped");
        Ok(())
    }

    /// Periodically drop sessions nobody has touched or joined for a while
    fn start_eviction_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let service = self.sync_service.clone();
        let max_idle = self.config.session.idle_eviction();
        let every = Duration::from_secs(self.config.session.eviction_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = service.evict_idle(max_idle);
                        debug!(evicted, "Idle session sweep finished");
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Idle session sweep stopped");
        }
        .in_current_span())
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = create_router(AppState::new(
            self.sync_service.clone(),
            self.config.session.max_message_bytes,
        ));

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        }
        .in_current_span());

        Ok(handle)
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
