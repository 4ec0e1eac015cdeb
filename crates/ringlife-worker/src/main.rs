//! Worker binary for the ringlife cluster.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`RINGLIFE_CONFIG` or `ringlife.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Bind the listener
//! 4. Subscribe to the broker, retrying with a fixed backoff
//! 5. Serve worker calls until the broker sends Close

use std::sync::Arc;

use anyhow::Context;
use ringlife_core::config::{ClusterConfig, WorkerConfig};
use ringlife_core::{http, logging};
use ringlife_types::wire::{Role, SubscribeRequest, SubscribeResponse};
use ringlife_worker::peer::Connector;
use ringlife_worker::{WorkerEngine, server};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClusterConfig::load().context("loading configuration")?;
    logging::init(&config.logging);

    let worker = config.worker;
    info!(
        host = %worker.host,
        port = worker.port,
        broker = %worker.broker,
        pipeline_depth = worker.pipeline_depth,
        "ringlife-worker starting"
    );

    let client = http::client()?;
    let engine = Arc::new(WorkerEngine::new(
        worker.pipeline_depth,
        Connector::Http(client.clone()),
    ));

    let listener = server::bind(&worker.host, worker.port).await?;
    let serving = tokio::spawn(server::serve(listener, Arc::clone(&engine), worker.grace()));

    subscribe(&client, &worker).await?;

    serving.await.context("server task panicked")??;
    info!("ringlife-worker exited");
    Ok(())
}

async fn subscribe(client: &reqwest::Client, worker: &WorkerConfig) -> anyhow::Result<()> {
    let req = SubscribeRequest {
        address: worker.advertised(),
        role: Role::Worker,
    };
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        match http::post_json::<_, SubscribeResponse>(client, &worker.broker, "/broker/subscribe", &req).await {
            Ok(res) => {
                info!(
                    broker = %worker.broker,
                    address = %req.address,
                    live_workers = res.live_workers,
                    "subscribed to broker"
                );
                return Ok(());
            }
            Err(e) if attempt < worker.subscribe_attempts => {
                warn!(attempt, error = %e, "subscription failed, retrying");
                tokio::time::sleep(worker.subscribe_backoff()).await;
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("subscribing to {} after {attempt} attempts", worker.broker)
                });
            }
        }
    }
}
