//! Axum router for the broker calls.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::handlers;

/// Build the broker router over a shared broker.
pub fn build_router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/broker/subscribe", post(handlers::subscribe))
        .route("/broker/break-world", post(handlers::break_world))
        .route("/broker/pause", post(handlers::pause))
        .route("/broker/close", post(handlers::close))
        .route("/broker/report-turn", post(handlers::report_turn))
        .route("/broker/addresses", get(handlers::addresses))
        .route("/broker/state", get(handlers::current_state))
        .route("/broker/alive", get(handlers::count_alive))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}
