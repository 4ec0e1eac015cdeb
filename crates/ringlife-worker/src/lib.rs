//! Worker process for the ringlife cluster.
//!
//! A worker owns one band of the grid and advances it turn by turn,
//! exchanging single boundary rows with its two ring neighbours.
//!
//! # Modules
//!
//! - [`engine`] -- The worker state machine and pipelined turn loop.
//! - [`halo`] -- Bounded counting semaphores gating halo readiness.
//! - [`snapshots`] -- Per-turn band history of a round.
//! - [`peer`] -- Links to neighbours and the broker (HTTP or in-process).
//! - [`handlers`] / [`router`] / [`server`] -- The HTTP surface.
//! - [`error`] -- [`WorkerError`](error::WorkerError).

pub mod engine;
pub mod error;
pub mod halo;
pub mod handlers;
pub mod peer;
pub mod router;
pub mod server;
pub mod snapshots;

pub use engine::{WorkerEngine, WorkerStatus};
pub use error::WorkerError;
pub use peer::{Connector, LocalRing};
