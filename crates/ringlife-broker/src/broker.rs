//! Broker state: the canonical grid, the live worker list, and the
//! control queries that can be served at any time.
//!
//! The turn loop itself lives in [`dispatch`](crate::dispatch). Lock
//! discipline: the grid and turn counter sit behind one lock, the worker
//! list behind another, and a third serializes `BreakWorld` runs so two
//! loops never advance the same grid.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ringlife_core::config::{BrokerConfig, WorkerConfig};
use ringlife_core::http::LinkError;
use ringlife_core::ledger::TurnLedger;
use ringlife_types::Grid;
use ringlife_types::wire::{
    AddressesResponse, BrokerPauseResponse, CloseRequest, CountAliveResponse,
    CurrentStateResponse, ReportTurnRequest, ReportTurnResponse, Role, SubscribeRequest,
    SubscribeResponse,
};
use ringlife_worker::peer::LocalRing;
use ringlife_worker::{Connector, WorkerEngine};
use tokio::sync::{Mutex, RwLock, oneshot, watch};
use tracing::{info, warn};

use crate::error::BrokerError;
use crate::link::{Dialer, WorkerLink};

/// Run-loop settings taken from [`BrokerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Address workers report turns to.
    pub advertise: String,
    /// Turns per `RunWorld` dispatch.
    pub round_turns: u64,
    /// Aborted pipelined rounds tolerated per run.
    pub max_round_retries: u32,
    /// Longest a turn report is held.
    pub report_wait: Duration,
}

impl BrokerSettings {
    /// Settings from the `broker` config section.
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            advertise: config.advertised(),
            round_turns: config.round_turns.max(1),
            max_round_retries: config.max_round_retries,
            report_wait: config.report_wait(),
        }
    }
}

/// The canonical grid and the global turn counter.
#[derive(Debug, Default)]
pub(crate) struct World {
    pub(crate) grid: Option<Grid>,
    pub(crate) completed: u64,
}

#[derive(Debug, Default)]
struct PauseSlot {
    running: bool,
    waiters: Vec<oneshot::Sender<u64>>,
}

/// The coordinator. One per broker process, shared behind an [`Arc`].
#[derive(Debug)]
pub struct Broker {
    pub(crate) settings: BrokerSettings,
    dialer: Dialer,
    pub(crate) ledger: Arc<TurnLedger>,
    pub(crate) workers: RwLock<Vec<WorkerLink>>,
    standbys: RwLock<Vec<String>>,
    pub(crate) world: RwLock<World>,
    pub(crate) run_lock: Mutex<()>,
    pause: Mutex<PauseSlot>,
    epochs: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Broker {
    /// Create a broker with no workers and no grid.
    pub fn new(settings: BrokerSettings, dialer: Dialer, ledger: Arc<TurnLedger>) -> Self {
        Self {
            settings,
            dialer,
            ledger,
            workers: RwLock::new(Vec::new()),
            standbys: RwLock::new(Vec::new()),
            world: RwLock::new(World::default()),
            run_lock: Mutex::new(()),
            pause: Mutex::new(PauseSlot::default()),
            epochs: AtomicU64::new(epoch_seed()),
            shutdown: watch::channel(false).0,
        }
    }

    /// Create a broker hosting `count` in-process workers, already subscribed.
    ///
    /// The workers are named `embedded-0`, `embedded-1`, ... and reach each
    /// other and the broker's ledger without a socket.
    pub async fn with_embedded_workers(
        settings: BrokerSettings,
        count: usize,
        worker: &WorkerConfig,
    ) -> Result<Arc<Self>, BrokerError> {
        let ledger = Arc::new(TurnLedger::new());
        let ring = Arc::new(LocalRing::new(Arc::clone(&ledger), settings.report_wait));
        let broker = Arc::new(Self::new(settings, Dialer::Local(Arc::clone(&ring)), ledger));

        for i in 0..count {
            let addr = format!("embedded-{i}");
            let engine = Arc::new(WorkerEngine::new(
                worker.pipeline_depth,
                Connector::Local(Arc::clone(&ring)),
            ));
            ring.register(addr.clone(), &engine).await;
            broker
                .subscribe(SubscribeRequest {
                    address: addr,
                    role: Role::Worker,
                })
                .await?;
        }
        info!(count, "embedded workers started");
        Ok(broker)
    }

    /// A fresh dispatch epoch.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::AcqRel)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Register a worker (after checking it answers) or a standby broker.
    ///
    /// A worker that subscribes again replaces its previous link.
    pub async fn subscribe(&self, req: SubscribeRequest) -> Result<SubscribeResponse, BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        match req.role {
            Role::Worker => {
                let link = self.dialer.dial(&req.address).await?;
                let mut workers = self.workers.write().await;
                workers.retain(|w| w.addr() != req.address);
                workers.push(link);
                info!(worker = %req.address, live_workers = workers.len(), "worker subscribed");
                Ok(SubscribeResponse {
                    live_workers: workers.len(),
                })
            }
            Role::Broker => {
                let mut standbys = self.standbys.write().await;
                if !standbys.contains(&req.address) {
                    standbys.push(req.address.clone());
                }
                info!(standby = %req.address, "standby broker registered");
                Ok(SubscribeResponse {
                    live_workers: self.workers.read().await.len(),
                })
            }
        }
    }

    /// Remove a worker whose call failed.
    pub(crate) async fn mark_dead(&self, addr: &str, error: &LinkError) {
        let mut workers = self.workers.write().await;
        let before = workers.len();
        workers.retain(|w| w.addr() != addr);
        if workers.len() < before {
            warn!(worker = addr, error = %error, live_workers = workers.len(), "worker removed");
        }
    }

    /// Addresses of the live workers and the known standby brokers.
    pub async fn addresses(&self) -> AddressesResponse {
        AddressesResponse {
            workers: self
                .workers
                .read()
                .await
                .iter()
                .map(|w| w.addr().to_owned())
                .collect(),
            brokers: self.standbys.read().await.clone(),
        }
    }

    /// Number of live workers.
    pub async fn live_workers(&self) -> usize {
        self.workers.read().await.len()
    }

    // -----------------------------------------------------------------------
    // Snapshot queries
    // -----------------------------------------------------------------------

    /// Turn counter and a copy of the canonical grid.
    pub async fn current_state(&self) -> CurrentStateResponse {
        let world = self.world.read().await;
        CurrentStateResponse {
            completed_turns: world.completed,
            alive_count: world.grid.as_ref().map_or(0, Grid::alive_count),
            grid: world.grid.clone(),
        }
    }

    /// Turn counter and live cell count of the canonical grid.
    pub async fn count_alive(&self) -> CountAliveResponse {
        let world = self.world.read().await;
        CountAliveResponse {
            completed_turns: world.completed,
            alive_count: world.grid.as_ref().map_or(0, Grid::alive_count),
        }
    }

    pub(crate) async fn publish(&self, grid: &Grid, completed: u64) {
        let mut world = self.world.write().await;
        world.grid = Some(grid.clone());
        world.completed = completed;
    }

    /// Hold a worker's turn report until it is within its pipeline depth.
    pub async fn report_turn(&self, req: ReportTurnRequest) -> ReportTurnResponse {
        self.ledger.report(req, self.settings.report_wait).await
    }

    // -----------------------------------------------------------------------
    // Pause
    // -----------------------------------------------------------------------

    /// Halt the run at its next turn boundary.
    ///
    /// Blocks until the loop has stopped, so the grid read right after is
    /// consistent. With no run in flight this is a no-op.
    pub async fn pause(&self) -> BrokerPauseResponse {
        let waiter = {
            let mut slot = self.pause.lock().await;
            if !slot.running {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                slot.waiters.push(tx);
                Some(rx)
            }
        };
        let Some(rx) = waiter else {
            return BrokerPauseResponse {
                was_running: false,
                completed_turns: self.world.read().await.completed,
            };
        };
        let completed_turns = match rx.await {
            Ok(turns) => turns,
            Err(_dropped) => self.world.read().await.completed,
        };
        info!(completed_turns, "run paused");
        BrokerPauseResponse {
            was_running: true,
            completed_turns,
        }
    }

    pub(crate) async fn start_run(&self) {
        self.pause.lock().await.running = true;
    }

    pub(crate) async fn pause_requested(&self) -> bool {
        !self.pause.lock().await.waiters.is_empty()
    }

    /// Mark the run finished and release every pause waiter.
    pub(crate) async fn finish_run(&self, completed: u64) {
        let mut slot = self.pause.lock().await;
        slot.running = false;
        for waiter in slot.waiters.drain(..) {
            if waiter.send(completed).is_err() {
                warn!("pause caller went away before the run halted");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    /// Halt any run, close the workers (when cascading), and release the
    /// listener after its grace period.
    pub async fn close(&self, req: CloseRequest) {
        self.shutdown.send_replace(true);
        self.pause().await;
        if req.cascade {
            let workers: Vec<WorkerLink> = self.workers.write().await.drain(..).collect();
            let closes = workers.iter().map(|w| async move {
                if let Err(e) = w.close().await {
                    warn!(worker = w.addr(), error = %e, "worker close failed");
                }
            });
            futures::future::join_all(closes).await;
            info!(workers = workers.len(), "workers closed");
        }
        info!("broker closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        if rx.wait_for(|closed| *closed).await.is_err() {
            warn!("shutdown signal dropped");
        }
    }

    /// Lifecycle name for the health route.
    pub async fn health_state(&self) -> &'static str {
        if self.is_closed() {
            "closed"
        } else if self.pause.lock().await.running {
            "running"
        } else {
            "idle"
        }
    }
}

/// Epochs start from the wall clock so a restarted or standby broker never
/// reuses the epochs of the broker it replaces.
fn epoch_seed() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(1)
}
