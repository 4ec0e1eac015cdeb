//! HTTP handlers for the worker calls.
//!
//! | Method | Path | Call |
//! |--------|------|------|
//! | `POST` | `/worker/init` | Init |
//! | `POST` | `/worker/run` | `RunWorld` |
//! | `POST` | `/worker/halo` | `SetHalo` |
//! | `GET` | `/worker/alive?turn=N` | `CountAliveAtTurn` |
//! | `GET` | `/worker/slice?turn=N` | `SliceAtTurn` |
//! | `POST` | `/worker/pause` | Pause |
//! | `POST` | `/worker/stop` | Stop |
//! | `POST` | `/worker/close` | Close |
//! | `GET` | `/health` | health probe |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use ringlife_types::wire::{
    Ack, CountAliveAtTurnResponse, HealthResponse, Role, RunWorldRequest, RunWorldResponse,
    SetHaloRequest, SliceAtTurnResponse, TurnQuery, WorkerInitRequest, WorkerPauseResponse,
};

use crate::engine::WorkerEngine;
use crate::error::WorkerError;

/// `POST /worker/init`
pub async fn init(
    State(engine): State<Arc<WorkerEngine>>,
    Json(req): Json<WorkerInitRequest>,
) -> Result<Json<Ack>, WorkerError> {
    engine.init(req).await?;
    Ok(Json(Ack::OK))
}

/// `POST /worker/run` -- runs the whole round before answering.
pub async fn run_world(
    State(engine): State<Arc<WorkerEngine>>,
    Json(req): Json<RunWorldRequest>,
) -> Result<Json<RunWorldResponse>, WorkerError> {
    Ok(Json(engine.run_world(req).await?))
}

/// `POST /worker/halo`
pub async fn set_halo(
    State(engine): State<Arc<WorkerEngine>>,
    Json(req): Json<SetHaloRequest>,
) -> Result<Json<Ack>, WorkerError> {
    engine.set_halo(req).await?;
    Ok(Json(Ack::OK))
}

/// `GET /worker/alive?turn=N`
pub async fn count_alive_at_turn(
    State(engine): State<Arc<WorkerEngine>>,
    Query(query): Query<TurnQuery>,
) -> Result<Json<CountAliveAtTurnResponse>, WorkerError> {
    Ok(Json(engine.count_alive_at_turn(query.turn).await?))
}

/// `GET /worker/slice?turn=N`
pub async fn slice_at_turn(
    State(engine): State<Arc<WorkerEngine>>,
    Query(query): Query<TurnQuery>,
) -> Result<Json<SliceAtTurnResponse>, WorkerError> {
    Ok(Json(engine.slice_at_turn(query.turn).await?))
}

/// `POST /worker/pause`
pub async fn pause(
    State(engine): State<Arc<WorkerEngine>>,
) -> Result<Json<WorkerPauseResponse>, WorkerError> {
    Ok(Json(engine.pause().await?))
}

/// `POST /worker/stop`
pub async fn stop(State(engine): State<Arc<WorkerEngine>>) -> Result<Json<Ack>, WorkerError> {
    engine.stop().await?;
    Ok(Json(Ack::OK))
}

/// `POST /worker/close` -- the listener shuts down after its grace period.
pub async fn close(State(engine): State<Arc<WorkerEngine>>) -> Json<Ack> {
    engine.close().await;
    Json(Ack::OK)
}

/// `GET /health`
pub async fn health(State(engine): State<Arc<WorkerEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        role: Role::Worker,
        state: engine.status().await.as_str().to_owned(),
    })
}
