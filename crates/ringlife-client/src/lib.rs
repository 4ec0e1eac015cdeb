//! Client for the ringlife broker.
//!
//! [`BrokerClient`] makes single calls against one broker. [`Session`]
//! drives a whole run: it keeps a backup snapshot while the run is in
//! flight and moves to an alternate broker if the current one is lost.
//!
//! # Modules
//!
//! - [`broker`] -- Typed broker calls.
//! - [`session`] -- Backup snapshots and failover.
//! - [`error`] -- [`ClientError`].

pub mod broker;
pub mod error;
pub mod session;

pub use broker::BrokerClient;
pub use error::ClientError;
pub use session::{Checkpoint, Session};
