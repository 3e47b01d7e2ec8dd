//! HTTP server: binding, background maintenance and graceful shutdown.

mod handlers;
mod router;

pub use router::{AppState, create_router};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::authn::CACHE_TTL;
use crate::{Error, Result};

/// The Gatekeeper HTTP server.
pub struct Server {
    host: String,
    port: u16,
    state: Arc<AppState>,
}

impl Server {
    /// A server for the given bind address and shared state.
    #[must_use]
    pub fn new(host: &str, port: u16, state: Arc<AppState>) -> Self {
        Self {
            host: host.to_string(),
            port,
            state,
        }
    }

    /// Bind and serve until SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error when the host does not parse or the listener cannot
    /// bind.
    pub async fn run(self) -> Result<()> {
        let host: IpAddr = self
            .host
            .parse()
            .map_err(|e| Error::Config(format!("invalid host {:?}: {e}", self.host)))?;
        let addr = SocketAddr::new(host, self.port);
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, "Gatekeeper listening");

        // Hourly sweep of authenticator caches; mostly relevant for the
        // per-token userinfo entries, which are otherwise unbounded.
        let registry = Arc::clone(&self.state.registry);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_TTL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.authenticators().evict_expired();
            }
        });

        axum::serve(listener, create_router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
