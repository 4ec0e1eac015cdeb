//! JSON-over-HTTP calls between cluster processes.
//!
//! Every cross-process call is a JSON request answered by a JSON body.
//! Failures are split into two kinds, and both mean the same thing to a
//! caller that tolerates fail-stop peers: the peer is gone.

use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A failed call to another cluster process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The request could not be delivered or the connection dropped.
    #[error("connection to {addr} failed: {message}")]
    Connection {
        /// Address that was dialed.
        addr: String,
        /// Transport error text.
        message: String,
    },

    /// The peer answered, but not with a success status and a valid body.
    #[error("protocol error from {addr}: {message}")]
    Protocol {
        /// Address that answered.
        addr: String,
        /// Status or decode error text.
        message: String,
    },
}

impl LinkError {
    /// Address of the peer the call was made to.
    pub fn addr(&self) -> &str {
        match self {
            Self::Connection { addr, .. } | Self::Protocol { addr, .. } => addr,
        }
    }
}

/// Base URL for a `host:port` address. Full URLs pass through unchanged.
pub fn base_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.trim_end_matches('/').to_owned()
    } else {
        format!("http://{addr}")
    }
}

/// Build the HTTP client shared by every link of a process.
///
/// # Errors
///
/// Returns [`LinkError::Connection`] if the TLS backend cannot initialize.
pub fn client() -> Result<Client, LinkError> {
    Client::builder()
        .tcp_nodelay(true)
        .build()
        .map_err(|e| LinkError::Connection {
            addr: String::from("-"),
            message: format!("http client init failed: {e}"),
        })
}

/// `POST {addr}{path}` with a JSON body, decoding a JSON reply.
pub async fn post_json<B, R>(client: &Client, addr: &str, path: &str, body: &B) -> Result<R, LinkError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let url = format!("{}{path}", base_url(addr));
    debug!(%url, "POST");
    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(|e| connection(addr, &e))?;
    decode(addr, response).await
}

/// `GET {addr}{path}`, decoding a JSON reply.
pub async fn get_json<R>(client: &Client, addr: &str, path: &str) -> Result<R, LinkError>
where
    R: DeserializeOwned,
{
    let url = format!("{}{path}", base_url(addr));
    debug!(%url, "GET");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| connection(addr, &e))?;
    decode(addr, response).await
}

async fn decode<R: DeserializeOwned>(addr: &str, response: Response) -> Result<R, LinkError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(LinkError::Protocol {
            addr: addr.to_owned(),
            message: format!("status {status}: {text}"),
        });
    }
    response.json::<R>().await.map_err(|e| {
        if e.is_decode() {
            LinkError::Protocol {
                addr: addr.to_owned(),
                message: format!("malformed body: {e}"),
            }
        } else {
            connection(addr, &e)
        }
    })
}

fn connection(addr: &str, e: &reqwest::Error) -> LinkError {
    LinkError::Connection {
        addr: addr.to_owned(),
        message: e.to_string(),
    }
}
