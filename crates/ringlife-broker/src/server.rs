//! Broker HTTP server lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use crate::broker::Broker;
use crate::router::build_router;

/// Errors that can occur when starting or running the broker server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

/// Bind `host:port`.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is taken or invalid.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {host}:{port}: {e}")))
}

/// Serve broker calls on `listener` until the broker is closed, plus `grace`.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] if the server hits a fatal I/O error.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    grace: Duration,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "broker listening");
    }
    let router = build_router(Arc::clone(&broker));
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            broker.closed().await;
            tokio::time::sleep(grace).await;
            info!("broker listener shutting down");
        })
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))
}
