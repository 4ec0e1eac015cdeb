//! The worker engine: one band, advanced turn by turn through halo exchange.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --init--> Initialized --run--> Running --+--> Initialized (round done)
//!                              ^                         +--> Paused  (resumable by run)
//!                              +-------- init -----------+--> Stopped (until next init)
//! any state --close--> Closed
//! ```
//!
//! # Turn loop
//!
//! A round starts from the band the broker sends. Slot 0 is seeded with it
//! and both halo edges are posted. Then, for every turn:
//!
//! 1. wait until both halo edges of the current slot are posted;
//! 2. apply the rule to the slot's band;
//! 3. store the result as the next slot;
//! 4. report the turn to the broker, stalling while this band is a full
//!    pipeline depth ahead of the slowest band;
//! 5. discard slots below the round minimum;
//! 6. if turns remain, send the first interior row to the predecessor and
//!    the last to the successor (or to itself in a ring of one).
//!
//! Every wait selects against the control channel, so Stop and Pause take
//! effect even while the engine is blocked on a neighbour.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ringlife_core::ledger::within_depth;
use ringlife_core::rule;
use ringlife_types::wire::{
    CountAliveAtTurnResponse, ReportTurnRequest, RunWorldRequest, RunWorldResponse,
    SetHaloRequest, SliceAtTurnResponse, WorkerInitRequest, WorkerPauseResponse,
};
use ringlife_types::{Edge, Row, count_alive};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::halo::HaloGate;
use crate::peer::{Connector, HaloSender, Reporter};
use crate::snapshots::SnapshotStore;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// No ring position yet.
    Uninitialized,
    /// Ready to run a round.
    Initialized,
    /// A round is in progress.
    Running,
    /// The last round was paused before its turn target.
    Paused,
    /// Stopped by the broker; needs a new `Init`.
    Stopped,
    /// Closed for good.
    Closed,
}

impl WorkerStatus {
    /// Lowercase name for health reports and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop,
}

#[derive(Debug)]
enum Neighbours {
    SelfLoop,
    Peers {
        predecessor: HaloSender,
        successor: HaloSender,
    },
}

/// The ring position received in `Init`.
#[derive(Debug)]
struct Ring {
    index: usize,
    width: usize,
    max_turns: u64,
    neighbours: Neighbours,
    reporter: Reporter,
}

/// State of one dispatch round: its halo gate and slot history.
#[derive(Debug)]
struct RoundState {
    epoch: u64,
    started: AtomicBool,
    gate: HaloGate,
    snapshots: Mutex<SnapshotStore>,
}

impl RoundState {
    fn new(epoch: u64, capacity: usize) -> Self {
        Self {
            epoch,
            started: AtomicBool::new(false),
            gate: HaloGate::new(capacity),
            snapshots: Mutex::new(SnapshotStore::new()),
        }
    }
}

/// A worker owning one band of the grid.
///
/// Constructed once per process and shared behind an [`Arc`] by the HTTP
/// handlers and any in-process neighbours.
#[derive(Debug)]
pub struct WorkerEngine {
    depth: u64,
    connector: Connector,
    status: RwLock<WorkerStatus>,
    ring: RwLock<Option<Arc<Ring>>>,
    round: Mutex<Option<Arc<RoundState>>>,
    run_lock: Mutex<()>,
    control: watch::Sender<Control>,
    running: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
    completed: AtomicU64,
}

impl WorkerEngine {
    /// Create an uninitialized engine.
    ///
    /// `depth` is the pipeline depth: how many turns this worker may run
    /// ahead of the slowest band, and the capacity of each halo edge.
    pub fn new(depth: u64, connector: Connector) -> Self {
        Self {
            depth: depth.max(2),
            connector,
            status: RwLock::new(WorkerStatus::Uninitialized),
            ring: RwLock::new(None),
            round: Mutex::new(None),
            run_lock: Mutex::new(()),
            control: watch::channel(Control::Run).0,
            running: watch::channel(false).0,
            shutdown: watch::channel(false).0,
            completed: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> WorkerStatus {
        *self.status.read().await
    }

    /// Turns completed in the latest round.
    pub fn completed_turns(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        usize::try_from(self.depth).unwrap_or(usize::MAX)
    }

    // -----------------------------------------------------------------------
    // Init
    // -----------------------------------------------------------------------

    /// Take a place in the ring, discarding any previous round.
    ///
    /// Accepted in every state except Closed. A round in progress is
    /// stopped first.
    pub async fn init(&self, req: WorkerInitRequest) -> Result<(), WorkerError> {
        if self.status().await == WorkerStatus::Closed {
            return Err(WorkerError::Closed);
        }
        if req.ring_size == 0 || req.index >= req.ring_size {
            return Err(WorkerError::InvalidRequest(format!(
                "band {} does not fit a ring of {}",
                req.index, req.ring_size
            )));
        }
        if req.width == 0 || req.height == 0 {
            return Err(WorkerError::InvalidRequest(format!(
                "empty band {}x{}",
                req.width, req.height
            )));
        }

        self.halt(Control::Stop).await;

        let neighbours = if req.ring_size == 1 {
            Neighbours::SelfLoop
        } else {
            let capacity = self.capacity().saturating_mul(2);
            Neighbours::Peers {
                predecessor: HaloSender::spawn(self.connector.peer(&req.predecessor).await, capacity),
                successor: HaloSender::spawn(self.connector.peer(&req.successor).await, capacity),
            }
        };
        let ring = Ring {
            index: req.index,
            width: req.width,
            max_turns: req.turns,
            neighbours,
            reporter: self.connector.reporter(&req.broker),
        };

        let mut status = self.status.write().await;
        if *status == WorkerStatus::Closed {
            return Err(WorkerError::Closed);
        }
        *self.ring.write().await = Some(Arc::new(ring));
        if let Some(old) = self.round.lock().await.take() {
            old.gate.close();
        }
        self.completed.store(0, Ordering::Release);
        *status = WorkerStatus::Initialized;

        info!(
            index = req.index,
            ring_size = req.ring_size,
            predecessor = %req.predecessor,
            successor = %req.successor,
            width = req.width,
            height = req.height,
            max_turns = req.turns,
            "worker initialized"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // RunWorld
    // -----------------------------------------------------------------------

    /// Run one round: advance `req.band` by `req.turns` turns.
    ///
    /// Returns early with fewer completed turns if paused. Fails with
    /// [`WorkerError::Stopped`] if stopped mid-round.
    pub async fn run_world(&self, req: RunWorldRequest) -> Result<RunWorldResponse, WorkerError> {
        let _run = self.run_lock.try_lock().map_err(|_busy| WorkerError::Busy)?;

        let ring = {
            let mut status = self.status.write().await;
            match *status {
                WorkerStatus::Closed => return Err(WorkerError::Closed),
                WorkerStatus::Uninitialized => return Err(WorkerError::NotInitialized),
                WorkerStatus::Stopped => return Err(WorkerError::Stopped),
                WorkerStatus::Initialized | WorkerStatus::Running | WorkerStatus::Paused => {}
            }
            let ring = self
                .ring
                .read()
                .await
                .clone()
                .ok_or(WorkerError::NotInitialized)?;
            validate_run(&ring, &req)?;
            *status = WorkerStatus::Running;
            self.control.send_replace(Control::Run);
            self.running.send_replace(true);
            ring
        };

        let round = self.claim_round(req.epoch).await;
        let turns = req.turns;
        let epoch = req.epoch;
        debug!(epoch, turns, index = ring.index, "round started");

        let result = self.drive(&ring, &round, req).await;

        {
            let mut status = self.status.write().await;
            if *status == WorkerStatus::Running {
                *status = match &result {
                    Ok(out) if out.completed_turns < turns => WorkerStatus::Paused,
                    Err(WorkerError::Stopped) => WorkerStatus::Stopped,
                    _ => WorkerStatus::Initialized,
                };
            }
            self.running.send_replace(false);
        }

        match &result {
            Ok(out) => debug!(epoch, completed = out.completed_turns, "round finished"),
            Err(e) => warn!(epoch, error = %e, "round failed"),
        }
        result
    }

    async fn claim_round(&self, epoch: u64) -> Arc<RoundState> {
        let mut current = self.round.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.epoch == epoch && !existing.started.swap(true, Ordering::AcqRel) {
                return Arc::clone(existing);
            }
            existing.gate.close();
        }
        let fresh = Arc::new(RoundState::new(epoch, self.capacity()));
        fresh.started.store(true, Ordering::Release);
        *current = Some(Arc::clone(&fresh));
        fresh
    }

    async fn drive(
        &self,
        ring: &Ring,
        round: &RoundState,
        req: RunWorldRequest,
    ) -> Result<RunWorldResponse, WorkerError> {
        let RunWorldRequest {
            epoch, turns, band, ..
        } = req;
        let mut control = self.control.subscribe();

        round.snapshots.lock().await.seed(band);
        for edge in [Edge::Top, Edge::Bottom] {
            round
                .gate
                .post(edge)
                .await
                .map_err(|_closed| WorkerError::Abandoned(epoch))?;
        }
        self.completed.store(0, Ordering::Release);

        let mut completed: u64 = 0;
        while completed < turns {
            match interruptible(&mut control, round.gate.wait_both()).await {
                Ok(Ok(())) => {}
                Ok(Err(_closed)) => return Err(WorkerError::Abandoned(epoch)),
                Err(Control::Pause) => break,
                Err(_) => return Err(WorkerError::Stopped),
            }

            let current = round.snapshots.lock().await.band_at(completed)?;
            let next = rule::step_band(&current);
            let turn = completed.saturating_add(1);
            let boundary = if turn < turns {
                Some(boundary_rows(&next)?)
            } else {
                None
            };
            round.snapshots.lock().await.store_interior(turn, next);
            completed = turn;
            self.completed.store(turn, Ordering::Release);

            let Some(min) = self.await_window(ring, epoch, turn, &mut control).await? else {
                break;
            };
            let retained = {
                let mut snapshots = round.snapshots.lock().await;
                snapshots.acknowledge(min);
                snapshots.retained()
            };
            debug!(epoch, turn, min, retained, "turn completed");

            if let Some((first, last)) = boundary {
                let pushed = self
                    .push_boundary(ring, round, epoch, turn, first, last, &mut control)
                    .await?;
                if !pushed {
                    break;
                }
            }
        }

        let interior = round
            .snapshots
            .lock()
            .await
            .interior_at(completed)
            .map(<[Row]>::to_vec)
            .ok_or(WorkerError::TurnNotRetained(completed))?;
        Ok(RunWorldResponse {
            completed_turns: completed,
            interior,
        })
    }

    /// Report `turn` and wait until this band is within depth of the
    /// slowest one. Returns the round minimum, or `None` if paused.
    async fn await_window(
        &self,
        ring: &Ring,
        epoch: u64,
        turn: u64,
        control: &mut watch::Receiver<Control>,
    ) -> Result<Option<u64>, WorkerError> {
        let req = ReportTurnRequest {
            epoch,
            index: ring.index,
            turn,
            depth: self.depth,
        };
        loop {
            let res = match interruptible(control, ring.reporter.report(req)).await {
                Ok(res) => res?,
                Err(Control::Pause) => return Ok(None),
                Err(_) => return Err(WorkerError::Stopped),
            };
            if res.stale {
                // Reassigned work is tracked by no ledger; it only ever
                // runs a turn or two.
                if within_depth(turn, 0, self.depth) {
                    return Ok(Some(0));
                }
                return Err(WorkerError::Abandoned(epoch));
            }
            if within_depth(turn, res.min_completed, self.depth) {
                return Ok(Some(res.min_completed));
            }
            debug!(epoch, turn, min = res.min_completed, "pipeline full, stalling");
        }
    }

    /// Deliver this turn's boundary rows. Returns `false` if paused first.
    #[allow(clippy::too_many_arguments)]
    async fn push_boundary(
        &self,
        ring: &Ring,
        round: &RoundState,
        epoch: u64,
        turn: u64,
        first: Row,
        last: Row,
        control: &mut watch::Receiver<Control>,
    ) -> Result<bool, WorkerError> {
        match &ring.neighbours {
            Neighbours::SelfLoop => {
                {
                    let mut snapshots = round.snapshots.lock().await;
                    snapshots.set_halo(turn, Edge::Top, last);
                    snapshots.set_halo(turn, Edge::Bottom, first);
                }
                for edge in [Edge::Top, Edge::Bottom] {
                    round
                        .gate
                        .post(edge)
                        .await
                        .map_err(|_closed| WorkerError::Abandoned(epoch))?;
                }
                Ok(true)
            }
            Neighbours::Peers {
                predecessor,
                successor,
            } => {
                let to_predecessor = SetHaloRequest {
                    epoch,
                    turn,
                    edge: Edge::Bottom,
                    row: first,
                };
                let to_successor = SetHaloRequest {
                    epoch,
                    turn,
                    edge: Edge::Top,
                    row: last,
                };
                let sent = interruptible(control, async {
                    predecessor.send(to_predecessor).await?;
                    successor.send(to_successor).await
                })
                .await;
                match sent {
                    Ok(res) => res.map(|()| true),
                    Err(Control::Pause) => Ok(false),
                    Err(_) => Err(WorkerError::Stopped),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // SetHalo
    // -----------------------------------------------------------------------

    /// Store a neighbour's halo row and post its edge.
    ///
    /// Rows for an older round are acknowledged and dropped. A row for a
    /// newer round opens that round, so halos may arrive before the
    /// matching `RunWorld`.
    pub async fn set_halo(&self, req: SetHaloRequest) -> Result<(), WorkerError> {
        if self.status().await == WorkerStatus::Closed {
            return Err(WorkerError::Closed);
        }
        let Some(round) = self.round_for_halo(req.epoch).await else {
            debug!(epoch = req.epoch, turn = req.turn, "stale halo dropped");
            return Ok(());
        };
        let stored = round
            .snapshots
            .lock()
            .await
            .set_halo(req.turn, req.edge, req.row);
        if !stored {
            debug!(epoch = req.epoch, turn = req.turn, "halo for collected turn dropped");
            return Ok(());
        }
        round
            .gate
            .post(req.edge)
            .await
            .map_err(|_closed| WorkerError::Abandoned(req.epoch))?;
        debug!(
            epoch = req.epoch,
            turn = req.turn,
            edge = req.edge.as_str(),
            pending = round.gate.pending(req.edge),
            "halo posted"
        );
        Ok(())
    }

    async fn round_for_halo(&self, epoch: u64) -> Option<Arc<RoundState>> {
        let mut current = self.round.lock().await;
        match current.as_ref() {
            Some(existing) if existing.epoch == epoch => return Some(Arc::clone(existing)),
            Some(existing) if existing.epoch > epoch => return None,
            Some(existing) => existing.gate.close(),
            None => {}
        }
        let fresh = Arc::new(RoundState::new(epoch, self.capacity()));
        *current = Some(Arc::clone(&fresh));
        Some(fresh)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    async fn latest_round(&self) -> Result<Arc<RoundState>, WorkerError> {
        if self.status().await == WorkerStatus::Closed {
            return Err(WorkerError::Closed);
        }
        self.round
            .lock()
            .await
            .clone()
            .ok_or(WorkerError::TurnNotRetained(0))
    }

    /// Live cells of the band interior after `turn` turns of the latest round.
    pub async fn count_alive_at_turn(&self, turn: u64) -> Result<CountAliveAtTurnResponse, WorkerError> {
        let round = self.latest_round().await?;
        let snapshots = round.snapshots.lock().await;
        let interior = snapshots
            .interior_at(turn)
            .ok_or(WorkerError::TurnNotRetained(turn))?;
        Ok(CountAliveAtTurnResponse {
            turn,
            alive_count: count_alive(interior),
        })
    }

    /// Band interior after `turn` turns of the latest round.
    pub async fn slice_at_turn(&self, turn: u64) -> Result<SliceAtTurnResponse, WorkerError> {
        let round = self.latest_round().await?;
        let interior = round
            .snapshots
            .lock()
            .await
            .interior_at(turn)
            .map(<[Row]>::to_vec)
            .ok_or(WorkerError::TurnNotRetained(turn))?;
        Ok(SliceAtTurnResponse { turn, interior })
    }

    /// Most computed slots the latest round held ahead of the ring minimum.
    pub async fn peak_unacknowledged(&self) -> usize {
        match self.round.lock().await.as_ref() {
            Some(round) => round.snapshots.lock().await.peak_unacknowledged(),
            None => 0,
        }
    }

    // -----------------------------------------------------------------------
    // Control
    // -----------------------------------------------------------------------

    /// Stop at the next turn boundary and report the turns completed.
    ///
    /// Returns once the round has halted. A no-op when idle.
    pub async fn pause(&self) -> Result<WorkerPauseResponse, WorkerError> {
        if self.status().await == WorkerStatus::Closed {
            return Err(WorkerError::Closed);
        }
        self.halt(Control::Pause).await;
        Ok(WorkerPauseResponse {
            completed_turns: self.completed_turns(),
        })
    }

    /// Abort any round immediately, even mid-wait.
    ///
    /// The worker rejects `RunWorld` until it is re-initialized.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write().await;
            if *status == WorkerStatus::Closed {
                return Err(WorkerError::Closed);
            }
            *status = WorkerStatus::Stopped;
            self.control.send_replace(Control::Stop);
        }
        self.close_gate().await;
        self.wait_idle().await;
        info!("worker stopped");
        Ok(())
    }

    /// Tear the worker down for good and release the listener.
    pub async fn close(&self) {
        {
            let mut status = self.status.write().await;
            *status = WorkerStatus::Closed;
            self.control.send_replace(Control::Stop);
        }
        if let Some(round) = self.round.lock().await.take() {
            round.gate.close();
        }
        self.ring.write().await.take();
        self.wait_idle().await;
        self.shutdown.send_replace(true);
        info!("worker closed");
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        if rx.wait_for(|closed| *closed).await.is_err() {
            debug!("shutdown signal dropped");
        }
    }

    async fn halt(&self, signal: Control) {
        if !*self.running.borrow() {
            return;
        }
        self.control.send_replace(signal);
        if signal == Control::Stop {
            self.close_gate().await;
        }
        self.wait_idle().await;
    }

    async fn close_gate(&self) {
        if let Some(round) = self.round.lock().await.as_ref() {
            round.gate.close();
        }
    }

    async fn wait_idle(&self) {
        let mut rx = self.running.subscribe();
        if rx.wait_for(|running| !*running).await.is_err() {
            debug!("run flag dropped");
        }
    }
}

fn validate_run(ring: &Ring, req: &RunWorldRequest) -> Result<(), WorkerError> {
    if req.width != ring.width {
        return Err(WorkerError::InvalidRequest(format!(
            "width {} does not match ring width {}",
            req.width, ring.width
        )));
    }
    if req.turns > ring.max_turns {
        return Err(WorkerError::InvalidRequest(format!(
            "{} turns exceeds the initialized maximum of {}",
            req.turns, ring.max_turns
        )));
    }
    req.band
        .validate(req.width)
        .map_err(|e| WorkerError::InvalidRequest(e.to_string()))?;
    if req.band.height() != req.height {
        return Err(WorkerError::InvalidRequest(format!(
            "band has {} rows, request says {}",
            req.band.height(),
            req.height
        )));
    }
    Ok(())
}

fn boundary_rows(interior: &[Row]) -> Result<(Row, Row), WorkerError> {
    match (interior.first(), interior.last()) {
        (Some(first), Some(last)) => Ok((first.clone(), last.clone())),
        _ => Err(WorkerError::InvalidRequest("band has no interior rows".to_owned())),
    }
}

/// Run `fut` unless the control channel leaves `Run` first.
async fn interruptible<F: Future>(
    control: &mut watch::Receiver<Control>,
    fut: F,
) -> Result<F::Output, Control> {
    tokio::select! {
        biased;
        halted = control.wait_for(|c| *c != Control::Run) => {
            Err(halted.map_or(Control::Stop, |c| *c))
        }
        out = fut => Ok(out),
    }
}
