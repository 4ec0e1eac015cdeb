//! Standby registration with a primary broker.
//!
//! A standby adopts the primary's workers (subscribing each one to itself)
//! and then registers with the primary as a broker, so the primary's
//! Addresses call tells clients where to fail over.

use reqwest::Client;
use ringlife_core::http::{self, LinkError};
use ringlife_types::wire::{AddressesResponse, Role, SubscribeRequest, SubscribeResponse};
use tracing::{info, warn};

use crate::broker::Broker;

/// Adopt the primary's workers and register with it.
///
/// Workers that cannot be reached are skipped; the registration itself
/// must succeed.
///
/// # Errors
///
/// Returns a [`LinkError`] if the primary cannot be reached.
pub async fn register(broker: &Broker, client: &Client, primary: &str) -> Result<usize, LinkError> {
    let addresses: AddressesResponse = http::get_json(client, primary, "/broker/addresses").await?;
    let mut adopted: usize = 0;
    for worker in addresses.workers {
        let req = SubscribeRequest {
            address: worker.clone(),
            role: Role::Worker,
        };
        match broker.subscribe(req).await {
            Ok(_) => adopted = adopted.saturating_add(1),
            Err(e) => warn!(worker = %worker, error = %e, "could not adopt worker"),
        }
    }

    let req = SubscribeRequest {
        address: broker.settings.advertise.clone(),
        role: Role::Broker,
    };
    let res: SubscribeResponse = http::post_json(client, primary, "/broker/subscribe", &req).await?;
    info!(
        primary,
        adopted,
        primary_workers = res.live_workers,
        "registered as standby"
    );
    Ok(adopted)
}
