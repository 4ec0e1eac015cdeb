//! Error types for the broker client.

use ringlife_core::http::LinkError;

/// Errors returned by [`Session`](crate::session::Session) and
/// [`BrokerClient`](crate::broker::BrokerClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A broker call failed.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// No broker address was configured.
    #[error("no broker address configured")]
    NoBrokers,

    /// Every failover attempt failed.
    #[error("no broker reachable after {attempts} failover attempts (last error: {last})")]
    FailoverTimeout {
        /// Attempts made.
        attempts: u32,
        /// The last connection error seen.
        last: LinkError,
    },
}
