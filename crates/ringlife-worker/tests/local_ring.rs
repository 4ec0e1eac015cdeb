//! Worker rings wired in-process, checked against the serial reference.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ringlife_core::ledger::TurnLedger;
use ringlife_core::partition::{Partition, ring_neighbours};
use ringlife_core::rule;
use ringlife_types::wire::{RunWorldRequest, RunWorldResponse, WorkerInitRequest};
use ringlife_types::{Grid, Row};
use ringlife_worker::{Connector, LocalRing, WorkerEngine, WorkerError, WorkerStatus};
use tokio::task::JoinHandle;

struct TestRing {
    ledger: Arc<TurnLedger>,
    engines: Vec<Arc<WorkerEngine>>,
}

async fn test_ring(workers: usize, depth: u64) -> TestRing {
    let ledger = Arc::new(TurnLedger::new());
    let ring = Arc::new(LocalRing::new(Arc::clone(&ledger), Duration::from_secs(5)));
    let mut engines = Vec::new();
    for i in 0..workers {
        let engine = Arc::new(WorkerEngine::new(depth, Connector::Local(Arc::clone(&ring))));
        ring.register(format!("w{i}"), &engine).await;
        engines.push(engine);
    }
    TestRing { ledger, engines }
}

fn random_grid(width: usize, height: usize, seed: u64) -> Grid {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = (0..height)
        .map(|_| {
            (0..width)
                .map(|_| if rng.random_bool(0.35) { 255 } else { 0 })
                .collect()
        })
        .collect();
    Grid::from_rows(rows).unwrap()
}

impl TestRing {
    async fn init(&self, partition: &Partition, width: usize, max_turns: u64) {
        let n = partition.len();
        for (i, spec) in partition.bands().iter().enumerate() {
            let (pred, succ) = ring_neighbours(i, n);
            self.engines[i]
                .init(WorkerInitRequest {
                    index: i,
                    ring_size: n,
                    predecessor: format!("w{pred}"),
                    successor: format!("w{succ}"),
                    broker: "local".to_owned(),
                    turns: max_turns,
                    width,
                    height: spec.height(),
                })
                .await
                .unwrap();
        }
    }

    fn start(
        &self,
        partition: &Partition,
        grid: &Grid,
        epoch: u64,
        turns: u64,
    ) -> Vec<JoinHandle<Result<RunWorldResponse, WorkerError>>> {
        let bands = partition.cut(grid).unwrap();
        bands
            .into_iter()
            .enumerate()
            .map(|(i, band)| {
                let engine = Arc::clone(&self.engines[i]);
                let req = RunWorldRequest {
                    epoch,
                    turns,
                    width: grid.width(),
                    height: band.height(),
                    band,
                };
                tokio::spawn(async move { engine.run_world(req).await })
            })
            .collect()
    }

    async fn run(&self, grid: &Grid, turns: u64) -> Grid {
        let partition = Partition::new(grid.height(), self.engines.len()).unwrap();
        self.init(&partition, grid.width(), turns).await;
        self.ledger.begin_round(1, partition.len());
        let handles = self.start(&partition, grid, 1, turns);

        let mut out = grid.clone();
        for (spec, handle) in partition.bands().iter().zip(handles) {
            let res = handle.await.unwrap().unwrap();
            assert_eq!(res.completed_turns, turns);
            partition.merge(&mut out, spec, res.interior).unwrap();
        }
        out
    }
}

#[tokio::test]
async fn single_worker_matches_serial_reference() {
    let grid = random_grid(13, 11, 7);
    let ring = test_ring(1, 3).await;
    let out = ring.run(&grid, 10).await;
    assert_eq!(out, rule::advance(&grid, 10));
}

#[tokio::test]
async fn rings_of_several_workers_match_serial_reference() {
    let grid = random_grid(20, 17, 42);
    let expected = rule::advance(&grid, 12);
    for workers in [2, 3, 5, 8] {
        let ring = test_ring(workers, 3).await;
        let out = ring.run(&grid, 12).await;
        assert_eq!(out, expected, "ring of {workers} diverged");
    }
}

#[tokio::test]
async fn more_workers_than_rows_still_tiles_the_grid() {
    let grid = random_grid(9, 4, 3);
    let ring = test_ring(4, 2).await;
    let out = ring.run(&grid, 6).await;
    assert_eq!(out, rule::advance(&grid, 6));
}

#[tokio::test]
async fn slow_band_stalls_fast_workers_at_pipeline_depth() {
    let depth = 2;
    let turns = 10;
    let grid = random_grid(12, 12, 99);
    let ring = test_ring(2, depth).await;
    let partition = Partition::new(grid.height(), 2).unwrap();
    ring.init(&partition, grid.width(), turns).await;

    // A third band that never reports keeps the round minimum at zero.
    ring.ledger.begin_round(5, 3);
    let handles = ring.start(&partition, &grid, 5, turns);

    tokio::time::sleep(Duration::from_millis(150)).await;
    for engine in &ring.engines {
        assert_eq!(engine.completed_turns(), depth);
        assert_eq!(engine.status().await, WorkerStatus::Running);
    }
    assert!(handles.iter().all(|h| !h.is_finished()));

    ring.ledger.record(5, 2, 3);
    tokio::time::sleep(Duration::from_millis(150)).await;
    for engine in &ring.engines {
        assert_eq!(engine.completed_turns(), 3 + depth);
    }

    ring.ledger.record(5, 2, turns);
    let mut out = grid.clone();
    for (spec, handle) in partition.bands().iter().zip(handles) {
        let res = handle.await.unwrap().unwrap();
        partition.merge(&mut out, spec, res.interior).unwrap();
    }
    assert_eq!(out, rule::advance(&grid, turns));

    for engine in &ring.engines {
        let peak = engine.peak_unacknowledged().await;
        assert!(peak <= usize::try_from(depth).unwrap(), "held {peak} snapshots");
    }
}

#[tokio::test]
async fn stop_unblocks_a_worker_waiting_on_its_neighbour() {
    let grid = random_grid(8, 8, 5);
    let ring = test_ring(2, 3).await;
    let partition = Partition::new(grid.height(), 2).unwrap();
    ring.init(&partition, grid.width(), 5).await;
    ring.ledger.begin_round(1, 2);

    // Only band 0 runs; it finishes turn 1 and then waits for band 1's halos.
    let band = partition.cut(&grid).unwrap().remove(0);
    let engine = Arc::clone(&ring.engines[0]);
    let run = tokio::spawn(async move {
        engine
            .run_world(RunWorldRequest {
                epoch: 1,
                turns: 5,
                width: 8,
                height: band.height(),
                band,
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!run.is_finished());
    assert_eq!(ring.engines[0].completed_turns(), 1);

    ring.engines[0].stop().await.unwrap();
    assert!(matches!(run.await.unwrap(), Err(WorkerError::Stopped)));
    assert_eq!(ring.engines[0].status().await, WorkerStatus::Stopped);

    let again = ring.engines[0]
        .run_world(RunWorldRequest {
            epoch: 2,
            turns: 1,
            width: 8,
            height: 4,
            band: partition.cut(&grid).unwrap().remove(0),
        })
        .await;
    assert!(matches!(again, Err(WorkerError::Stopped)));

    ring.init(&partition, grid.width(), 5).await;
    assert_eq!(ring.engines[0].status().await, WorkerStatus::Initialized);
}

#[tokio::test]
async fn pause_returns_partial_progress() {
    let grid = random_grid(8, 8, 11);
    let ring = test_ring(2, 3).await;
    let partition = Partition::new(grid.height(), 2).unwrap();
    ring.init(&partition, grid.width(), 5).await;
    ring.ledger.begin_round(1, 2);

    let band = partition.cut(&grid).unwrap().remove(0);
    let engine = Arc::clone(&ring.engines[0]);
    let run = tokio::spawn(async move {
        engine
            .run_world(RunWorldRequest {
                epoch: 1,
                turns: 5,
                width: 8,
                height: band.height(),
                band,
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let paused = ring.engines[0].pause().await.unwrap();
    assert_eq!(paused.completed_turns, 1);
    let res = run.await.unwrap().unwrap();
    assert_eq!(res.completed_turns, 1);
    assert_eq!(ring.engines[0].status().await, WorkerStatus::Paused);

    // Pausing an idle worker is a no-op.
    assert_eq!(ring.engines[1].pause().await.unwrap().completed_turns, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_worker_resumes_with_the_next_band() {
    let grid = random_grid(64, 64, 45);
    let turns = 100_000;
    let ring = test_ring(1, 3).await;
    let partition = Partition::new(grid.height(), 1).unwrap();
    ring.init(&partition, grid.width(), turns).await;
    ring.ledger.begin_round(1, 1);
    let run = ring.start(&partition, &grid, 1, turns).remove(0);

    let engine = Arc::clone(&ring.engines[0]);
    while engine.completed_turns() < 5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let paused = engine.pause().await.unwrap();
    let first = run.await.unwrap().unwrap();
    let done = first.completed_turns;
    assert_eq!(done, paused.completed_turns);
    assert!(done < turns);
    assert_eq!(engine.status().await, WorkerStatus::Paused);

    let resumed_from = Grid::from_rows(first.interior).unwrap();
    assert_eq!(resumed_from, rule::advance(&grid, done));

    ring.ledger.begin_round(2, 1);
    let second = engine
        .run_world(RunWorldRequest {
            epoch: 2,
            turns: 5,
            width: 64,
            height: 64,
            band: rule::whole_grid_band(&resumed_from),
        })
        .await
        .unwrap();
    assert_eq!(second.completed_turns, 5);
    assert_eq!(
        Grid::from_rows(second.interior).unwrap(),
        rule::advance(&grid, done + 5)
    );
    assert_eq!(engine.status().await, WorkerStatus::Initialized);
}

#[tokio::test]
async fn queries_read_the_latest_round() {
    let grid = random_grid(10, 6, 21);
    let ring = test_ring(1, 3).await;
    let out = ring.run(&grid, 3).await;

    let engine = &ring.engines[0];
    let slice = engine.slice_at_turn(3).await.unwrap();
    assert_eq!(slice.interior, out.rows().to_vec());
    let alive = engine.count_alive_at_turn(3).await.unwrap();
    assert_eq!(alive.alive_count, out.alive_count());

    // Turns every band has passed are discarded.
    assert!(matches!(
        engine.slice_at_turn(0).await,
        Err(WorkerError::TurnNotRetained(0))
    ));
}

#[tokio::test]
async fn run_before_init_is_rejected() {
    let ring = test_ring(1, 3).await;
    let grid = random_grid(4, 4, 1);
    let band = rule::whole_grid_band(&grid);
    let res = ring.engines[0]
        .run_world(RunWorldRequest {
            epoch: 1,
            turns: 1,
            width: 4,
            height: 4,
            band,
        })
        .await;
    assert!(matches!(res, Err(WorkerError::NotInitialized)));
}

#[tokio::test]
async fn closed_worker_rejects_everything() {
    let ring = test_ring(1, 3).await;
    let engine = &ring.engines[0];
    engine.close().await;
    engine.closed().await;
    assert_eq!(engine.status().await, WorkerStatus::Closed);
    assert!(matches!(engine.pause().await, Err(WorkerError::Closed)));
    assert!(matches!(engine.stop().await, Err(WorkerError::Closed)));
    let init = engine
        .init(WorkerInitRequest {
            index: 0,
            ring_size: 1,
            predecessor: "w0".to_owned(),
            successor: "w0".to_owned(),
            broker: "local".to_owned(),
            turns: 1,
            width: 4,
            height: 4,
        })
        .await;
    assert!(matches!(init, Err(WorkerError::Closed)));
}

#[tokio::test]
async fn oversized_run_is_rejected() {
    let grid = random_grid(6, 6, 2);
    let ring = test_ring(1, 3).await;
    let partition = Partition::new(6, 1).unwrap();
    ring.init(&partition, 6, 2).await;
    let res = ring.engines[0]
        .run_world(RunWorldRequest {
            epoch: 1,
            turns: 3,
            width: 6,
            height: 6,
            band: rule::whole_grid_band(&grid),
        })
        .await;
    assert!(matches!(res, Err(WorkerError::InvalidRequest(_))));

    let ragged: Vec<Row> = vec![vec![0; 6], vec![0; 5]];
    let mut band = rule::whole_grid_band(&grid);
    band.interior = ragged;
    let res = ring.engines[0]
        .run_world(RunWorldRequest {
            epoch: 2,
            turns: 1,
            width: 6,
            height: 2,
            band,
        })
        .await;
    assert!(matches!(res, Err(WorkerError::InvalidRequest(_))));
}
