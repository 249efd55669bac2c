//! HTTP server lifecycle.

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::routes::router;
use super::AppState;
use crate::error::{Result, TurnstileError};

/// HTTP server for the protected API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// State shared with the router
    state: AppState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Bind and serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %listener.local_addr()?, "Starting HTTP server");

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                TurnstileError::Io(e)
            })
    }
}
