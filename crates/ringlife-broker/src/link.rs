//! Links from the broker to its workers.
//!
//! [`WorkerLink`] dispatches over the two transports the same way the
//! worker's own peer links do. Any failure, local or remote, comes back as
//! a [`LinkError`], which the broker treats as the worker having died.

use std::sync::Arc;

use reqwest::Client;
use ringlife_core::http::{self, LinkError};
use ringlife_types::wire::{
    Ack, HealthResponse, Role, RunWorldRequest, RunWorldResponse, WorkerInitRequest,
};
use ringlife_worker::peer::LocalRing;
use ringlife_worker::{WorkerEngine, WorkerError};

/// A subscribed worker.
#[derive(Debug, Clone)]
pub enum WorkerLink {
    /// A worker process reached over HTTP.
    Http {
        /// Shared HTTP client.
        client: Client,
        /// The worker's `host:port`.
        addr: String,
    },
    /// A worker embedded in the broker process.
    Local {
        /// Registry name of the worker.
        addr: String,
        /// The worker itself.
        engine: Arc<WorkerEngine>,
    },
}

fn local_failure(addr: &str, e: &WorkerError) -> LinkError {
    LinkError::Protocol {
        addr: addr.to_owned(),
        message: e.to_string(),
    }
}

impl WorkerLink {
    /// Address the worker subscribed with.
    pub fn addr(&self) -> &str {
        match self {
            Self::Http { addr, .. } | Self::Local { addr, .. } => addr,
        }
    }

    /// `Worker.Init`
    pub async fn init(&self, req: WorkerInitRequest) -> Result<(), LinkError> {
        match self {
            Self::Http { client, addr } => {
                let _ack: Ack = http::post_json(client, addr, "/worker/init", &req).await?;
                Ok(())
            }
            Self::Local { addr, engine } => {
                engine.init(req).await.map_err(|e| local_failure(addr, &e))
            }
        }
    }

    /// `Worker.RunWorld`
    pub async fn run_world(&self, req: RunWorldRequest) -> Result<RunWorldResponse, LinkError> {
        match self {
            Self::Http { client, addr } => http::post_json(client, addr, "/worker/run", &req).await,
            Self::Local { addr, engine } => {
                engine.run_world(req).await.map_err(|e| local_failure(addr, &e))
            }
        }
    }

    /// `Worker.Stop`
    pub async fn stop(&self) -> Result<(), LinkError> {
        match self {
            Self::Http { client, addr } => {
                let _ack: Ack = http::post_json(client, addr, "/worker/stop", &()).await?;
                Ok(())
            }
            Self::Local { addr, engine } => engine.stop().await.map_err(|e| local_failure(addr, &e)),
        }
    }

    /// `Worker.Close`
    pub async fn close(&self) -> Result<(), LinkError> {
        match self {
            Self::Http { client, addr } => {
                let _ack: Ack = http::post_json(client, addr, "/worker/close", &()).await?;
                Ok(())
            }
            Self::Local { engine, .. } => {
                engine.close().await;
                Ok(())
            }
        }
    }
}

/// Opens [`WorkerLink`]s for subscribing addresses.
#[derive(Debug, Clone)]
pub enum Dialer {
    /// Workers are separate processes; dialing probes their health route.
    Http(Client),
    /// Workers are embedded; dialing looks them up in the registry.
    Local(Arc<LocalRing>),
}

impl Dialer {
    /// Open a link to the worker at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Connection`] if nothing answers at `addr`, and
    /// [`LinkError::Protocol`] if what answers is not a worker.
    pub async fn dial(&self, addr: &str) -> Result<WorkerLink, LinkError> {
        match self {
            Self::Http(client) => {
                let health: HealthResponse = http::get_json(client, addr, "/health").await?;
                if health.role != Role::Worker {
                    return Err(LinkError::Protocol {
                        addr: addr.to_owned(),
                        message: "subscriber is not a worker".to_owned(),
                    });
                }
                Ok(WorkerLink::Http {
                    client: client.clone(),
                    addr: addr.to_owned(),
                })
            }
            Self::Local(ring) => {
                let engine = ring.resolve(addr).await.ok_or_else(|| LinkError::Connection {
                    addr: addr.to_owned(),
                    message: "no embedded worker under this name".to_owned(),
                })?;
                Ok(WorkerLink::Local {
                    addr: addr.to_owned(),
                    engine,
                })
            }
        }
    }
}
