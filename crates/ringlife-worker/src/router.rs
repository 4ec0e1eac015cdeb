//! Axum router for the worker calls.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::engine::WorkerEngine;
use crate::handlers;

/// Build the worker router over a shared engine.
pub fn build_router(engine: Arc<WorkerEngine>) -> Router {
    Router::new()
        .route("/worker/init", post(handlers::init))
        .route("/worker/run", post(handlers::run_world))
        .route("/worker/halo", post(handlers::set_halo))
        .route("/worker/alive", get(handlers::count_alive_at_turn))
        .route("/worker/slice", get(handlers::slice_at_turn))
        .route("/worker/pause", post(handlers::pause))
        .route("/worker/stop", post(handlers::stop))
        .route("/worker/close", post(handlers::close))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
