//! Core computation and coordination primitives for the ringlife cluster.
//!
//! # Modules
//!
//! - [`rule`] -- The toroidal Game of Life step, over whole grids and over
//!   bands with halo rows.
//! - [`partition`] -- Splitting a grid into contiguous row bands for a ring
//!   of workers, and merging results back.
//! - [`ledger`] -- Per-round turn progress of every band, used to bound how
//!   far a worker may run ahead of the slowest band.
//! - [`http`] -- JSON-over-HTTP calls and the link error taxonomy.
//! - [`config`] -- YAML configuration for brokers, workers, and clients.
//! - [`logging`] -- Tracing subscriber bootstrap shared by the binaries.

pub mod config;
pub mod http;
pub mod ledger;
pub mod logging;
pub mod partition;
pub mod rule;
