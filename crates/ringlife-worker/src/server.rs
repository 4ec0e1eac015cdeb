//! Worker HTTP server lifecycle.
//!
//! [`serve`] runs the router on an already-bound listener until the engine
//! is closed, then keeps answering for a grace period so in-flight calls
//! (the broker's own Close among them) complete.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use crate::engine::WorkerEngine;
use crate::router::build_router;

/// Errors that can occur when starting or running the worker server.
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

/// Serve worker calls on `listener` until the engine closes.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] if the server hits a fatal I/O error.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<WorkerEngine>,
    grace: Duration,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "worker listening");
    }
    let router = build_router(Arc::clone(&engine));
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            engine.closed().await;
            tokio::time::sleep(grace).await;
            info!("worker listener shutting down");
        })
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))
}
