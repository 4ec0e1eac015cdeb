//! Error types for the worker engine and its HTTP surface.
//!
//! [`WorkerError`] covers every way a worker call can fail and converts
//! into an Axum response with a JSON `{ "error", "status" }` body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ringlife_core::http::LinkError;

use crate::snapshots::SlotError;

/// Errors returned by [`WorkerEngine`](crate::engine::WorkerEngine) calls.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The call needs a ring position and `Init` has not been received.
    #[error("worker has not been initialized")]
    NotInitialized,

    /// The worker was stopped; only `Init` is accepted until it is re-initialized.
    #[error("worker is stopped")]
    Stopped,

    /// The worker was closed and accepts no further calls.
    #[error("worker is closed")]
    Closed,

    /// A `RunWorld` is already in flight.
    #[error("a run is already in progress")]
    Busy,

    /// The request does not fit the worker's ring position.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The requested turn is not (or no longer) held.
    #[error("turn {0} is not retained")]
    TurnNotRetained(u64),

    /// The round was superseded while this worker was waiting on it.
    #[error("round {0} was abandoned")]
    Abandoned(u64),

    /// Halo delivery broke the exchange contract.
    #[error("halo protocol violation: {0}")]
    Protocol(#[from] SlotError),

    /// A call to a neighbour or the broker failed.
    #[error(transparent)]
    Link(#[from] LinkError),
}

impl IntoResponse for WorkerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotInitialized | Self::Stopped | Self::Busy | Self::Abandoned(_) => {
                StatusCode::CONFLICT
            }
            Self::Closed => StatusCode::GONE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::TurnNotRetained(_) => StatusCode::NOT_FOUND,
            Self::Protocol(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Link(_) => StatusCode::BAD_GATEWAY,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
