//! Links from a worker to its ring neighbours and to its broker.
//!
//! Each link is an enum over the two transports: `Http` for a neighbour in
//! another process and `Local` for one living in the same process (the
//! broker's embedded workers and the test rings). A [`Connector`] picks the
//! transport once, when the worker is initialized.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use reqwest::Client;
use ringlife_core::http::{self, LinkError};
use ringlife_core::ledger::TurnLedger;
use ringlife_types::wire::{Ack, ReportTurnRequest, ReportTurnResponse, SetHaloRequest};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::engine::WorkerEngine;
use crate::error::WorkerError;

/// A ring neighbour that receives halo rows.
#[derive(Debug, Clone)]
pub enum PeerLink {
    /// A worker reached over HTTP.
    Http {
        /// Shared HTTP client.
        client: Client,
        /// The neighbour's `host:port`.
        addr: String,
    },
    /// A worker in this process.
    Local {
        /// Registry name of the neighbour.
        addr: String,
        /// The neighbour itself; dangling once it is dropped.
        engine: Weak<WorkerEngine>,
    },
}

impl PeerLink {
    /// Address of the neighbour.
    pub fn addr(&self) -> &str {
        match self {
            Self::Http { addr, .. } | Self::Local { addr, .. } => addr,
        }
    }

    /// Deliver one halo row.
    pub async fn set_halo(&self, req: SetHaloRequest) -> Result<(), WorkerError> {
        match self {
            Self::Http { client, addr } => {
                let _ack: Ack = http::post_json(client, addr, "/worker/halo", &req).await?;
                Ok(())
            }
            Self::Local { addr, engine } => {
                let engine = engine.upgrade().ok_or_else(|| LinkError::Connection {
                    addr: addr.clone(),
                    message: "in-process worker is gone".to_owned(),
                })?;
                engine.set_halo(req).await
            }
        }
    }
}

/// Where a worker reports completed turns.
#[derive(Debug, Clone)]
pub enum Reporter {
    /// A broker reached over HTTP.
    Http {
        /// Shared HTTP client.
        client: Client,
        /// The broker's `host:port`.
        addr: String,
    },
    /// The ledger of a broker in this process.
    Local {
        /// The broker's turn ledger.
        ledger: Arc<TurnLedger>,
        /// Longest the ledger holds a report.
        max_wait: Duration,
    },
}

impl Reporter {
    /// Report a completed turn and get the round minimum back.
    pub async fn report(&self, req: ReportTurnRequest) -> Result<ReportTurnResponse, WorkerError> {
        match self {
            Self::Http { client, addr } => {
                Ok(http::post_json(client, addr, "/broker/report-turn", &req).await?)
            }
            Self::Local { ledger, max_wait } => Ok(ledger.report(req, *max_wait).await),
        }
    }
}

/// Registry of the workers and the ledger shared by an in-process ring.
#[derive(Debug)]
pub struct LocalRing {
    engines: RwLock<HashMap<String, Weak<WorkerEngine>>>,
    ledger: Arc<TurnLedger>,
    report_wait: Duration,
}

impl LocalRing {
    /// Create an empty registry reporting to `ledger`.
    pub fn new(ledger: Arc<TurnLedger>, report_wait: Duration) -> Self {
        Self {
            engines: RwLock::new(HashMap::new()),
            ledger,
            report_wait,
        }
    }

    /// Make `engine` reachable under `addr`.
    pub async fn register(&self, addr: impl Into<String>, engine: &Arc<WorkerEngine>) {
        self.engines
            .write()
            .await
            .insert(addr.into(), Arc::downgrade(engine));
    }

    /// Look up a live worker by address.
    pub async fn resolve(&self, addr: &str) -> Option<Arc<WorkerEngine>> {
        self.engines.read().await.get(addr).and_then(Weak::upgrade)
    }

    /// The ledger every local reporter writes to.
    pub const fn ledger(&self) -> &Arc<TurnLedger> {
        &self.ledger
    }
}

/// Builds links for one transport.
#[derive(Debug, Clone)]
pub enum Connector {
    /// Neighbours and broker are other processes.
    Http(Client),
    /// Neighbours and broker share this process.
    Local(Arc<LocalRing>),
}

impl Connector {
    /// Link to the neighbour at `addr`.
    ///
    /// An in-process address that is not registered yields a dangling link;
    /// deliveries over it fail like a dead remote peer.
    pub async fn peer(&self, addr: &str) -> PeerLink {
        match self {
            Self::Http(client) => PeerLink::Http {
                client: client.clone(),
                addr: addr.to_owned(),
            },
            Self::Local(ring) => PeerLink::Local {
                addr: addr.to_owned(),
                engine: ring
                    .engines
                    .read()
                    .await
                    .get(addr)
                    .cloned()
                    .unwrap_or_default(),
            },
        }
    }

    /// Reporter for the broker at `broker`.
    pub fn reporter(&self, broker: &str) -> Reporter {
        match self {
            Self::Http(client) => Reporter::Http {
                client: client.clone(),
                addr: broker.to_owned(),
            },
            Self::Local(ring) => Reporter::Local {
                ledger: Arc::clone(&ring.ledger),
                max_wait: ring.report_wait,
            },
        }
    }
}

/// Ordered, fire-and-forget delivery of halo rows to one neighbour.
///
/// Rows are queued on a bounded channel and delivered one at a time by a
/// background task, so they reach the neighbour in the order they were
/// sent. A full queue makes [`send`](Self::send) wait.
#[derive(Debug)]
pub struct HaloSender {
    addr: String,
    tx: mpsc::Sender<SetHaloRequest>,
}

impl HaloSender {
    /// Start the delivery task for `link`.
    pub fn spawn(link: PeerLink, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<SetHaloRequest>(capacity.max(1));
        let addr = link.addr().to_owned();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let (epoch, turn, edge) = (req.epoch, req.turn, req.edge);
                match link.set_halo(req).await {
                    Ok(()) => debug!(peer = link.addr(), epoch, turn, edge = edge.as_str(), "halo delivered"),
                    Err(e) => warn!(peer = link.addr(), epoch, turn, error = %e, "halo delivery failed"),
                }
            }
        });
        Self { addr, tx }
    }

    /// Queue one row for delivery.
    pub async fn send(&self, req: SetHaloRequest) -> Result<(), WorkerError> {
        self.tx.send(req).await.map_err(|e| {
            WorkerError::Link(LinkError::Connection {
                addr: self.addr.clone(),
                message: format!("halo queue closed: {e}"),
            })
        })
    }
}
