//! Error types for the broker and its HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ringlife_core::http::LinkError;
use ringlife_core::partition::PartitionError;

/// Errors returned by [`Broker`](crate::broker::Broker) calls.
///
/// Worker failures during a run never surface here: they are absorbed by
/// reassignment. Only a failed `Subscribe` reports a [`LinkError`].
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The request is malformed or inconsistent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A grid could not be split or reassembled.
    #[error("partition error: {0}")]
    Partition(#[from] PartitionError),

    /// The subscriber could not be reached.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The broker was closed.
    #[error("broker is closed")]
    Closed,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Partition(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Link(_) => StatusCode::BAD_GATEWAY,
            Self::Closed => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
