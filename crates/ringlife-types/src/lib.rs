//! Shared type definitions for the ringlife cluster.
//!
//! Every process in the cluster (broker, workers, clients) exchanges the
//! types defined here. They are plain data: no I/O, no async, no locks.
//!
//! # Modules
//!
//! - [`grid`] -- The toroidal byte grid and alive-cell helpers.
//! - [`band`] -- Row bands with halo rows, and band placement specs.
//! - [`wire`] -- Request and response bodies for every broker and worker call.

pub mod band;
pub mod grid;
pub mod wire;

pub use band::{Band, BandSpec, Edge};
pub use grid::{ALIVE, Cell, DEAD, Grid, GridError, Row, count_alive};
