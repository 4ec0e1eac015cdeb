//! HTTP handlers for the broker calls.
//!
//! | Method | Path | Call |
//! |--------|------|------|
//! | `POST` | `/broker/subscribe` | Subscribe |
//! | `POST` | `/broker/break-world` | `BreakWorld` |
//! | `POST` | `/broker/pause` | Pause |
//! | `POST` | `/broker/close` | Close |
//! | `POST` | `/broker/report-turn` | `ReportTurn` |
//! | `GET` | `/broker/addresses` | Addresses |
//! | `GET` | `/broker/state` | `CurrentState` |
//! | `GET` | `/broker/alive` | `CountAlive` |
//! | `GET` | `/health` | health probe |

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use ringlife_types::wire::{
    Ack, AddressesResponse, BreakWorldRequest, BreakWorldResponse, BrokerPauseResponse,
    CloseRequest, CountAliveResponse, CurrentStateResponse, HealthResponse, ReportTurnRequest,
    ReportTurnResponse, Role, SubscribeRequest, SubscribeResponse,
};

use crate::broker::Broker;
use crate::error::BrokerError;

/// `POST /broker/subscribe`
pub async fn subscribe(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, BrokerError> {
    Ok(Json(broker.subscribe(req).await?))
}

/// `POST /broker/break-world` -- answers when the run completes or is paused.
pub async fn break_world(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<BreakWorldRequest>,
) -> Result<Json<BreakWorldResponse>, BrokerError> {
    Ok(Json(broker.break_world(req).await?))
}

/// `POST /broker/pause`
pub async fn pause(State(broker): State<Arc<Broker>>) -> Json<BrokerPauseResponse> {
    Json(broker.pause().await)
}

/// `POST /broker/close`
///
/// An empty body cascades to the workers.
pub async fn close(State(broker): State<Arc<Broker>>, body: Bytes) -> Result<Json<Ack>, BrokerError> {
    let req = if body.is_empty() {
        CloseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| BrokerError::InvalidRequest(e.to_string()))?
    };
    broker.close(req).await;
    Ok(Json(Ack::OK))
}

/// `POST /broker/report-turn` -- held until the reporter is within depth.
pub async fn report_turn(
    State(broker): State<Arc<Broker>>,
    Json(req): Json<ReportTurnRequest>,
) -> Json<ReportTurnResponse> {
    Json(broker.report_turn(req).await)
}

/// `GET /broker/addresses`
pub async fn addresses(State(broker): State<Arc<Broker>>) -> Json<AddressesResponse> {
    Json(broker.addresses().await)
}

/// `GET /broker/state`
pub async fn current_state(State(broker): State<Arc<Broker>>) -> Json<CurrentStateResponse> {
    Json(broker.current_state().await)
}

/// `GET /broker/alive`
pub async fn count_alive(State(broker): State<Arc<Broker>>) -> Json<CountAliveResponse> {
    Json(broker.count_alive().await)
}

/// `GET /health`
pub async fn health(State(broker): State<Arc<Broker>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        role: Role::Broker,
        state: broker.health_state().await.to_owned(),
    })
}
