//! Sessions against brokers on real sockets.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ringlife_broker::{Broker, BrokerSettings, Dialer, server, standby};
use ringlife_client::{ClientError, Session};
use ringlife_core::config::{ClientConfig, WorkerConfig};
use ringlife_core::http;
use ringlife_core::ledger::TurnLedger;
use ringlife_core::rule;
use ringlife_types::wire::{BreakWorldRequest, Role, SubscribeRequest};
use ringlife_types::{ALIVE, DEAD, Grid};
use ringlife_worker::{Connector, WorkerEngine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn random_grid(width: usize, height: usize, seed: u64) -> Grid {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..height)
        .map(|_| {
            (0..width)
                .map(|_| if rng.random_bool(0.35) { ALIVE } else { DEAD })
                .collect()
        })
        .collect();
    Grid::from_rows(rows).unwrap()
}

fn request(grid: &Grid, turns: u64) -> BreakWorldRequest {
    BreakWorldRequest {
        turns,
        threads: 2,
        width: grid.width(),
        height: grid.height(),
        grid: grid.clone(),
    }
}

fn client_config(brokers: Vec<String>) -> ClientConfig {
    ClientConfig {
        brokers,
        failover_attempts: 3,
        failover_backoff_ms: 10,
        checkpoint_interval_ms: 20,
        checkpoint_min_gap_ms: 2,
    }
}

fn settings(advertise: &str) -> BrokerSettings {
    BrokerSettings {
        advertise: advertise.to_owned(),
        round_turns: 1,
        max_round_retries: 3,
        report_wait: Duration::from_secs(2),
    }
}

/// A broker with embedded workers, listening on an ephemeral port.
async fn live_broker(workers: usize) -> (String, Arc<Broker>) {
    let broker = Broker::with_embedded_workers(settings("local"), workers, &WorkerConfig::default())
        .await
        .unwrap();
    let listener = server::bind("127.0.0.1", 0).await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server::serve(listener, Arc::clone(&broker), Duration::ZERO));
    (addr, broker)
}

/// An address nothing listens on.
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

/// A broker stand-in that answers the snapshot and discovery routes with
/// fixed bodies and drops every `BreakWorld` connection after `hang`.
async fn vanishing_broker(state: serde_json::Value, addresses: serde_json::Value, hang: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let state = state.clone();
            let addresses = addresses.clone();
            tokio::spawn(async move {
                let mut buf = vec![0_u8; 64 * 1024];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..n]).into_owned();
                let body = if head.starts_with("GET /broker/state") {
                    state
                } else if head.starts_with("GET /broker/addresses") {
                    addresses
                } else if head.starts_with("GET /health") {
                    serde_json::json!({ "role": "broker", "state": "running" })
                } else {
                    tokio::time::sleep(hang).await;
                    return;
                };
                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).await.unwrap();
            });
        }
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_through_a_live_broker() {
    let (addr, _broker) = live_broker(2).await;
    let session = Session::new(&client_config(vec![addr])).unwrap();
    let grid = random_grid(16, 16, 1);

    let res = session.run(request(&grid, 12)).await.unwrap();
    assert_eq!(res.completed_turns, 12);
    assert_eq!(res.grid, rule::advance(&grid, 12));

    let last = session.progress().borrow().clone().unwrap();
    assert_eq!(last.turn, 12);
    assert_eq!(last.grid, res.grid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_broker_fails_over_to_configured_alternate() {
    let dead = dead_addr().await;
    let (live, _broker) = live_broker(2).await;
    let session = Session::new(&client_config(vec![dead, live.clone()])).unwrap();
    let grid = random_grid(12, 10, 2);

    let res = session.run(request(&grid, 7)).await.unwrap();
    assert_eq!(res.completed_turns, 7);
    assert_eq!(res.grid, rule::advance(&grid, 7));
    assert_eq!(session.broker().await.addr(), live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failover_resumes_from_the_backup_snapshot() {
    let (live, _broker) = live_broker(2).await;
    let grid = random_grid(16, 16, 3);
    // The backup the vanishing broker serves is deliberately not derived from
    // `grid`, so the final result shows which grid the run resumed from.
    let checkpoint = random_grid(16, 16, 4);
    let state = serde_json::json!({
        "completed_turns": 5,
        "grid": checkpoint,
        "alive_count": checkpoint.alive_count(),
    });
    let addresses = serde_json::json!({ "workers": [], "brokers": [live.clone()] });
    let primary = vanishing_broker(state, addresses, Duration::from_millis(150)).await;

    let session = Session::new(&client_config(vec![primary])).unwrap();
    let res = session.run(request(&grid, 20)).await.unwrap();

    assert_eq!(res.completed_turns, 20);
    assert_eq!(res.grid, rule::advance(&checkpoint, 15));
    assert_eq!(session.broker().await.addr(), live);
}

#[tokio::test]
async fn exhausted_failover_is_a_timeout() {
    let mut config = client_config(vec![dead_addr().await]);
    config.failover_attempts = 2;
    let session = Session::new(&config).unwrap();
    let grid = random_grid(4, 4, 5);

    let err = session.run(request(&grid, 3)).await.unwrap_err();
    assert!(matches!(err, ClientError::FailoverTimeout { attempts: 2, .. }), "{err}");
}

#[test]
fn a_session_needs_a_broker() {
    let err = Session::new(&client_config(Vec::new())).unwrap_err();
    assert!(matches!(err, ClientError::NoBrokers));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn standby_adopts_workers_and_is_advertised_to_clients() {
    let client = http::client().unwrap();

    let primary_listener = server::bind("127.0.0.1", 0).await.unwrap();
    let primary_addr = primary_listener.local_addr().unwrap().to_string();
    let primary = Arc::new(Broker::new(
        settings(&primary_addr),
        Dialer::Http(client.clone()),
        Arc::new(TurnLedger::new()),
    ));
    tokio::spawn(server::serve(primary_listener, Arc::clone(&primary), Duration::ZERO));

    let worker_listener = ringlife_worker::server::bind("127.0.0.1", 0).await.unwrap();
    let worker_addr = worker_listener.local_addr().unwrap().to_string();
    let engine = Arc::new(WorkerEngine::new(3, Connector::Http(client.clone())));
    tokio::spawn(ringlife_worker::server::serve(worker_listener, engine, Duration::ZERO));
    primary
        .subscribe(SubscribeRequest {
            address: worker_addr.clone(),
            role: Role::Worker,
        })
        .await
        .unwrap();

    let standby_listener = server::bind("127.0.0.1", 0).await.unwrap();
    let standby_addr = standby_listener.local_addr().unwrap().to_string();
    let standby_broker = Arc::new(Broker::new(
        settings(&standby_addr),
        Dialer::Http(client.clone()),
        Arc::new(TurnLedger::new()),
    ));
    tokio::spawn(server::serve(standby_listener, Arc::clone(&standby_broker), Duration::ZERO));

    let adopted = standby::register(&standby_broker, &client, &primary_addr).await.unwrap();
    assert_eq!(adopted, 1);
    assert_eq!(standby_broker.addresses().await.workers, vec![worker_addr]);
    assert_eq!(primary.addresses().await.brokers, vec![standby_addr.clone()]);

    let session = Session::new(&client_config(vec![primary_addr])).unwrap();
    let grid = random_grid(10, 10, 6);
    let res = session.run(request(&grid, 5)).await.unwrap();
    assert_eq!(res.grid, rule::advance(&grid, 5));
    assert_eq!(session.alternates().await, vec![standby_addr]);
}
