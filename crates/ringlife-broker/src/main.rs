//! Broker binary for the ringlife cluster.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`RINGLIFE_CONFIG` or `ringlife.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the broker, with embedded workers if configured
//! 4. Bind the listener and serve broker calls
//! 5. If configured as a standby, adopt the primary's workers and register
//! 6. Serve until a client sends Close

use std::sync::Arc;

use anyhow::Context;
use ringlife_broker::{Broker, BrokerSettings, Dialer, server, standby};
use ringlife_core::config::ClusterConfig;
use ringlife_core::ledger::TurnLedger;
use ringlife_core::{http, logging};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClusterConfig::load().context("loading configuration")?;
    logging::init(&config.logging);

    let cfg = config.broker;
    info!(
        host = %cfg.host,
        port = cfg.port,
        round_turns = cfg.round_turns,
        embedded_workers = cfg.embedded_workers,
        "ringlife-broker starting"
    );

    let settings = BrokerSettings::from_config(&cfg);
    let client = http::client()?;
    let broker = if cfg.embedded_workers > 0 {
        Broker::with_embedded_workers(settings, cfg.embedded_workers, &config.worker)
            .await
            .context("starting embedded workers")?
    } else {
        Arc::new(Broker::new(
            settings,
            Dialer::Http(client.clone()),
            Arc::new(TurnLedger::new()),
        ))
    };

    let listener = server::bind(&cfg.host, cfg.port).await?;
    let serving = tokio::spawn(server::serve(listener, Arc::clone(&broker), cfg.grace()));

    if let Some(primary) = &cfg.standby_of {
        standby::register(&broker, &client, primary)
            .await
            .with_context(|| format!("registering as standby of {primary}"))?;
    }

    serving.await.context("server task panicked")??;
    info!("ringlife-broker exited");
    Ok(())
}
