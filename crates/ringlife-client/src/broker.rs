//! Typed calls against one broker.

use reqwest::Client;
use ringlife_core::http::{self, LinkError};
use ringlife_types::wire::{
    Ack, AddressesResponse, BreakWorldRequest, BreakWorldResponse, BrokerPauseResponse,
    CloseRequest, CountAliveResponse, CurrentStateResponse, HealthResponse,
};

/// A broker at a fixed address.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    client: Client,
    addr: String,
}

impl BrokerClient {
    /// A client for the broker at `addr` sharing `client`'s connection pool.
    pub fn new(client: Client, addr: impl Into<String>) -> Self {
        Self {
            client,
            addr: addr.into(),
        }
    }

    /// The broker's `host:port`.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthResponse, LinkError> {
        http::get_json(&self.client, &self.addr, "/health").await
    }

    /// `GET /broker/addresses`
    pub async fn addresses(&self) -> Result<AddressesResponse, LinkError> {
        http::get_json(&self.client, &self.addr, "/broker/addresses").await
    }

    /// `POST /broker/break-world`. Answers when the run finishes or is paused.
    pub async fn break_world(&self, req: &BreakWorldRequest) -> Result<BreakWorldResponse, LinkError> {
        http::post_json(&self.client, &self.addr, "/broker/break-world", req).await
    }

    /// `GET /broker/state`
    pub async fn current_state(&self) -> Result<CurrentStateResponse, LinkError> {
        http::get_json(&self.client, &self.addr, "/broker/state").await
    }

    /// `GET /broker/alive`
    pub async fn count_alive(&self) -> Result<CountAliveResponse, LinkError> {
        http::get_json(&self.client, &self.addr, "/broker/alive").await
    }

    /// `POST /broker/pause`
    pub async fn pause(&self) -> Result<BrokerPauseResponse, LinkError> {
        http::post_json(&self.client, &self.addr, "/broker/pause", &()).await
    }

    /// `POST /broker/close`
    pub async fn close(&self, cascade: bool) -> Result<(), LinkError> {
        let _ack: Ack =
            http::post_json(&self.client, &self.addr, "/broker/close", &CloseRequest { cascade }).await?;
        Ok(())
    }
}
