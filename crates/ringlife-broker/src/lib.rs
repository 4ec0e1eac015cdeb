//! Broker process for the ringlife cluster.
//!
//! The broker owns the canonical grid. It cuts the grid into bands, hands
//! each band to a subscribed worker, merges the results and keeps going
//! when workers die.
//!
//! # Modules
//!
//! - [`broker`] -- Membership, snapshot queries, Pause and Close.
//! - [`dispatch`] -- The `BreakWorld` turn loop and its fault handling.
//! - [`link`] -- Links to workers (HTTP or in-process).
//! - [`standby`] -- Registration of a standby broker with its primary.
//! - [`handlers`] / [`router`] / [`server`] -- The HTTP surface.
//! - [`error`] -- [`BrokerError`](error::BrokerError).

pub mod broker;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod link;
pub mod router;
pub mod server;
pub mod standby;

pub use broker::{Broker, BrokerSettings};
pub use error::BrokerError;
pub use link::{Dialer, WorkerLink};
