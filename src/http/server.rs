//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::RateLimitState;
use crate::error::{QuotaError, Result};
use crate::store::CountingStore;

/// HTTP server fronting the rate limited routes.
pub struct HttpServer<S> {
    /// Address to bind to
    addr: SocketAddr,
    /// Middleware state holding the rate limiter
    state: RateLimitState<S>,
}

impl<S: CountingStore + 'static> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, state: RateLimitState<S>) -> Self {
        Self { addr, state }
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            QuotaError::Io(e)
        })?;

        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Starting HTTP server");

        let app = super::router(self.state);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            QuotaError::Io(e)
        })
    }
}
