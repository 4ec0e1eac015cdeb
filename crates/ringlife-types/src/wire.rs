//! Request and response bodies for every cluster call.
//!
//! Broker calls are served under `/broker/*`, worker calls under
//! `/worker/*`. Every body is JSON. Field names are stable: standby brokers
//! and clients of a different build talk to each other through them.

use serde::{Deserialize, Serialize};

use crate::band::{Band, Edge};
use crate::grid::{Cell, Grid, Row};

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Generic acknowledgement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Always `true` on success; failures use an error body instead.
    pub ok: bool,
}

impl Ack {
    /// The success acknowledgement.
    pub const OK: Self = Self { ok: true };
}

/// Body of `GET /health` on both brokers and workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Which kind of process answered.
    pub role: Role,
    /// Human-readable lifecycle state (e.g. `running`, `idle`).
    pub state: String,
}

/// The kind of process registering with a broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A worker that computes bands.
    #[default]
    Worker,
    /// A standby broker that clients may fail over to.
    Broker,
}

// ---------------------------------------------------------------------------
// Broker calls
// ---------------------------------------------------------------------------

/// Body of `POST /broker/subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// `host:port` the subscriber listens on.
    pub address: String,
    /// Whether the subscriber is a worker or a standby broker.
    #[serde(default)]
    pub role: Role,
}

/// Response to `POST /broker/subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeResponse {
    /// Number of live workers after registration.
    pub live_workers: usize,
}

/// Response to `GET /broker/addresses`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressesResponse {
    /// Addresses of the live workers, in ring order.
    pub workers: Vec<String>,
    /// Addresses of standby brokers that registered with this broker.
    pub brokers: Vec<String>,
}

/// Body of `POST /broker/break-world`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakWorldRequest {
    /// Number of generations to compute.
    pub turns: u64,
    /// Upper bound on the number of worker bands.
    pub threads: usize,
    /// Grid width; must match `grid`.
    pub width: usize,
    /// Grid height; must match `grid`.
    pub height: usize,
    /// Starting grid.
    pub grid: Grid,
}

/// Response to `POST /broker/break-world`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakWorldResponse {
    /// Turns completed by this run (less than requested after a pause).
    pub completed_turns: u64,
    /// Grid after `completed_turns` generations.
    pub grid: Grid,
    /// Every live cell of `grid`.
    pub alive_cells: Vec<Cell>,
}

/// Response to `GET /broker/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStateResponse {
    /// Turns completed by the current (or last) run.
    pub completed_turns: u64,
    /// The canonical grid, absent before the first run.
    pub grid: Option<Grid>,
    /// Live cells in `grid`.
    pub alive_count: usize,
}

/// Response to `GET /broker/alive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAliveResponse {
    /// Turns completed by the current (or last) run.
    pub completed_turns: u64,
    /// Live cells in the canonical grid.
    pub alive_count: usize,
}

/// Response to `POST /broker/pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerPauseResponse {
    /// Whether a run was in flight and has now stopped.
    pub was_running: bool,
    /// Turns completed when the loop halted.
    pub completed_turns: u64,
}

/// Body of `POST /broker/close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    /// Also close every subscribed worker.
    #[serde(default = "default_cascade")]
    pub cascade: bool,
}

impl Default for CloseRequest {
    fn default() -> Self {
        Self { cascade: true }
    }
}

const fn default_cascade() -> bool {
    true
}

/// Body of `POST /broker/report-turn`: a worker finished a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTurnRequest {
    /// Dispatch round the turn belongs to.
    pub epoch: u64,
    /// Ring index of the reporting band.
    pub index: usize,
    /// Turns the band has completed in this round.
    pub turn: u64,
    /// The reporter's pipeline depth; the broker holds the reply until the
    /// reporter is within this many turns of the slowest band.
    pub depth: u64,
}

/// Response to `POST /broker/report-turn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTurnResponse {
    /// Minimum completed turn across every band of the round.
    pub min_completed: u64,
    /// The report named a round the broker is no longer tracking.
    #[serde(default)]
    pub stale: bool,
}

impl ReportTurnResponse {
    /// Reply to a report for a round that is not current.
    pub const STALE: Self = Self {
        min_completed: 0,
        stale: true,
    };
}

// ---------------------------------------------------------------------------
// Worker calls
// ---------------------------------------------------------------------------

/// Body of `POST /worker/init`: the worker's place in the ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInitRequest {
    /// Ring index of the band this worker will own.
    pub index: usize,
    /// Number of bands in the ring. A ring of one is self-looped.
    pub ring_size: usize,
    /// Address of the worker owning the band above.
    pub predecessor: String,
    /// Address of the worker owning the band below.
    pub successor: String,
    /// Address of the broker to report turns to.
    pub broker: String,
    /// Maximum turns a single `RunWorld` may request.
    pub turns: u64,
    /// Grid width.
    pub width: usize,
    /// Interior height of this worker's band.
    pub height: usize,
}

/// Body of `POST /worker/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWorldRequest {
    /// Dispatch round identifier, strictly increasing per `Init`.
    pub epoch: u64,
    /// Turns to compute in this round.
    pub turns: u64,
    /// Grid width.
    pub width: usize,
    /// Interior height of `band`.
    pub height: usize,
    /// Band state at turn 0 of the round, halos included.
    pub band: Band,
}

/// Response to `POST /worker/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWorldResponse {
    /// Turns completed in this round.
    pub completed_turns: u64,
    /// Interior rows after `completed_turns` turns.
    pub interior: Vec<Row>,
}

/// Body of `POST /worker/halo`: a neighbour delivers a boundary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetHaloRequest {
    /// Dispatch round the row belongs to.
    pub epoch: u64,
    /// Turn whose snapshot the row completes.
    pub turn: u64,
    /// Which halo of the receiver the row fills.
    pub edge: Edge,
    /// The boundary row.
    pub row: Row,
}

/// Query string of `GET /worker/alive` and `GET /worker/slice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnQuery {
    /// Turn (within the latest round) to read.
    pub turn: u64,
}

/// Response to `GET /worker/alive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountAliveAtTurnResponse {
    /// Turn that was read.
    pub turn: u64,
    /// Live cells in the interior at that turn.
    pub alive_count: usize,
}

/// Response to `GET /worker/slice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceAtTurnResponse {
    /// Turn that was read.
    pub turn: u64,
    /// Interior rows at that turn.
    pub interior: Vec<Row>,
}

/// Response to `POST /worker/pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPauseResponse {
    /// Last turn the worker completed.
    pub completed_turns: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_role_defaults_to_worker() {
        let req: SubscribeRequest =
            serde_json::from_value(serde_json::json!({ "address": "10.0.0.2:8040" })).unwrap();
        assert_eq!(req.role, Role::Worker);
    }

    #[test]
    fn close_cascades_by_default() {
        let req: CloseRequest = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(req.cascade);
        assert_eq!(CloseRequest::default(), req);
    }

    #[test]
    fn set_halo_body_shape() {
        let req = SetHaloRequest {
            epoch: 3,
            turn: 7,
            edge: Edge::Top,
            row: vec![0, 255],
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["edge"], "top");
        assert_eq!(value["turn"], 7);
    }
}
