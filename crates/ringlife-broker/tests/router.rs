//! Broker routes exercised through the Axum router without a socket.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use ringlife_broker::router::build_router;
use ringlife_broker::{Broker, BrokerSettings};
use ringlife_core::config::WorkerConfig;
use ringlife_core::rule;
use ringlife_types::{Cell, Grid};
use tower::ServiceExt;

async fn broker_app(workers: usize) -> (Router, Arc<Broker>) {
    let settings = BrokerSettings {
        advertise: "local".to_owned(),
        round_turns: 1,
        max_round_retries: 3,
        report_wait: Duration::from_secs(1),
    };
    let broker = Broker::with_embedded_workers(settings, workers, &WorkerConfig::default())
        .await
        .unwrap();
    (build_router(Arc::clone(&broker)), broker)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn blinker() -> Grid {
    Grid::with_alive(
        5,
        5,
        &[Cell { x: 1, y: 2 }, Cell { x: 2, y: 2 }, Cell { x: 3, y: 2 }],
    )
    .unwrap()
}

fn break_world_body(grid: &Grid, turns: u64, threads: usize) -> serde_json::Value {
    serde_json::json!({
        "turns": turns,
        "threads": threads,
        "width": grid.width(),
        "height": grid.height(),
        "grid": grid,
    })
}

#[tokio::test]
async fn health_reports_broker_state() {
    let (app, _) = broker_app(1).await;
    let (status, json) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["role"], "broker");
    assert_eq!(json["state"], "idle");
}

#[tokio::test]
async fn break_world_over_http() {
    let (app, _) = broker_app(2).await;
    let grid = blinker();
    let (status, json) = call(&app, "POST", "/broker/break-world", Some(break_world_body(&grid, 3, 2))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["completed_turns"], 3);
    let expected = rule::advance(&grid, 3);
    assert_eq!(json["grid"], serde_json::to_value(&expected).unwrap());
    assert_eq!(json["alive_cells"].as_array().unwrap().len(), 3);

    let (status, json) = call(&app, "GET", "/broker/alive", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["completed_turns"], 3);
    assert_eq!(json["alive_count"], 3);

    let (_, json) = call(&app, "GET", "/broker/state", None).await;
    assert_eq!(json["grid"], serde_json::to_value(&expected).unwrap());
}

#[tokio::test]
async fn state_before_any_run_has_no_grid() {
    let (app, _) = broker_app(1).await;
    let (status, json) = call(&app, "GET", "/broker/state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["completed_turns"], 0);
    assert!(json["grid"].is_null());
}

#[tokio::test]
async fn zero_threads_is_a_bad_request() {
    let (app, _) = broker_app(1).await;
    let (status, json) = call(&app, "POST", "/broker/break-world", Some(break_world_body(&blinker(), 1, 0))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn pause_with_no_run_reports_idle() {
    let (app, _) = broker_app(1).await;
    let (status, json) = call(&app, "POST", "/broker/pause", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["was_running"], false);
}

#[tokio::test]
async fn addresses_lists_workers_and_standbys() {
    let (app, _) = broker_app(2).await;
    let body = serde_json::json!({ "address": "10.0.0.9:8030", "role": "broker" });
    let (status, json) = call(&app, "POST", "/broker/subscribe", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["live_workers"], 2);

    let (_, json) = call(&app, "GET", "/broker/addresses", None).await;
    assert_eq!(json["workers"], serde_json::json!(["embedded-0", "embedded-1"]));
    assert_eq!(json["brokers"], serde_json::json!(["10.0.0.9:8030"]));
}

#[tokio::test]
async fn subscribing_an_unreachable_worker_is_a_bad_gateway() {
    let (app, _) = broker_app(1).await;
    let body = serde_json::json!({ "address": "nowhere:1" });
    let (status, json) = call(&app, "POST", "/broker/subscribe", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["status"], 502);
}

#[tokio::test]
async fn report_turn_for_an_unknown_round_is_stale() {
    let (app, _) = broker_app(1).await;
    let body = serde_json::json!({ "epoch": 1, "index": 0, "turn": 1, "depth": 3 });
    let (status, json) = call(&app, "POST", "/broker/report-turn", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stale"], true);
}

#[tokio::test]
async fn close_with_empty_body_cascades() {
    let (app, broker) = broker_app(2).await;
    let (status, json) = call(&app, "POST", "/broker/close", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(broker.live_workers().await, 0);

    let (_, json) = call(&app, "GET", "/health", None).await;
    assert_eq!(json["state"], "closed");

    let (status, json) = call(&app, "POST", "/broker/break-world", Some(break_world_body(&blinker(), 1, 1))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], 503);
}
