//! Pipelined rounds with every process boundary on a real socket.
//!
//! Workers exchange halos over `/worker/halo`, report turns to the broker's
//! `/broker/report-turn`, and the broker drives them with Init, `RunWorld`
//! and Stop over HTTP, as the binaries do.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ringlife_broker::{Broker, BrokerSettings, Dialer, server};
use ringlife_core::http;
use ringlife_core::ledger::TurnLedger;
use ringlife_core::rule;
use ringlife_types::wire::{BreakWorldRequest, Role, SubscribeRequest};
use ringlife_types::{ALIVE, DEAD, Grid};
use ringlife_worker::{Connector, WorkerEngine};

struct HttpCluster {
    broker: Arc<Broker>,
    engines: Vec<Arc<WorkerEngine>>,
}

async fn http_cluster(workers: usize, round_turns: u64) -> HttpCluster {
    let client = http::client().unwrap();

    let listener = server::bind("127.0.0.1", 0).await.unwrap();
    let broker_addr = listener.local_addr().unwrap().to_string();
    let broker = Arc::new(Broker::new(
        BrokerSettings {
            advertise: broker_addr,
            round_turns,
            max_round_retries: 3,
            report_wait: Duration::from_secs(2),
        },
        Dialer::Http(client.clone()),
        Arc::new(TurnLedger::new()),
    ));
    tokio::spawn(server::serve(listener, Arc::clone(&broker), Duration::ZERO));

    let mut engines = Vec::new();
    for _ in 0..workers {
        let engine = Arc::new(WorkerEngine::new(3, Connector::Http(client.clone())));
        let listener = ringlife_worker::server::bind("127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(ringlife_worker::server::serve(
            listener,
            Arc::clone(&engine),
            Duration::ZERO,
        ));
        broker
            .subscribe(SubscribeRequest {
                address: addr,
                role: Role::Worker,
            })
            .await
            .unwrap();
        engines.push(engine);
    }
    HttpCluster { broker, engines }
}

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

fn request(grid: &Grid, turns: u64, threads: usize) -> BreakWorldRequest {
    BreakWorldRequest {
        turns,
        threads,
        width: grid.width(),
        height: grid.height(),
        grid: grid.clone(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipelined_ring_over_http_matches_serial_reference() {
    let grid = random_grid(20, 18, 52);
    let c = http_cluster(3, 5).await;

    let res = c.broker.break_world(request(&grid, 23, 3)).await.unwrap();

    assert_eq!(res.completed_turns, 23);
    assert_eq!(res.grid, rule::advance(&grid, 23));
    assert_eq!(c.broker.live_workers().await, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipelined_ring_over_http_survives_a_worker_closing() {
    let grid = random_grid(24, 24, 61);
    let turns = 300;
    let c = http_cluster(4, 6).await;

    let broker = Arc::clone(&c.broker);
    let req = request(&grid, turns, 4);
    let run = tokio::spawn(async move { broker.break_world(req).await });

    while c.broker.count_alive().await.completed_turns < 12 && !run.is_finished() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    c.engines[1].close().await;

    let res = run.await.unwrap().unwrap();
    assert_eq!(res.completed_turns, turns);
    assert_eq!(res.grid, rule::advance(&grid, turns));
    assert_eq!(c.broker.live_workers().await, 3);
}
