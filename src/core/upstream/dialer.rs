// src/core/upstream/dialer.rs

//! Holds the current upstream endpoint and opens authenticated connections
//! to it.

use super::client::UpstreamClient;
use crate::core::BerylError;
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// The server the proxy currently forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Password for the `AUTH` handshake; `None` skips it.
    pub auth: Option<String>,
}

impl Endpoint {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens upstream connections against a mutable endpoint.
///
/// The endpoint sits behind a reader/writer lock: every `dial` holds the
/// read side for the duration of the connect, and a promotion holds the
/// write side for its whole run. A dial therefore never observes a
/// half-updated endpoint, and dials started during a promotion block until
/// it finishes and then see the post-promotion endpoint. This one lock is
/// also the promotion serialization point; no separate mutex exists.
pub struct Dialer {
    endpoint: RwLock<Endpoint>,
}

impl Dialer {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint: RwLock::new(endpoint),
        }
    }

    /// A snapshot of the current endpoint, for logging and inspection.
    pub async fn current(&self) -> Endpoint {
        self.endpoint.read().await.clone()
    }

    /// Connects to the current endpoint, performing the `AUTH` handshake
    /// when a password is configured.
    pub async fn dial(&self) -> Result<TcpStream, BerylError> {
        let endpoint = self.endpoint.read().await;
        let client = UpstreamClient::connect(&endpoint).await?;
        Ok(client.into_stream())
    }

    /// Takes the write side of the endpoint lock. Holding the guard blocks
    /// every dial; assigning through it resets the endpoint.
    pub async fn begin_update(&self) -> RwLockWriteGuard<'_, Endpoint> {
        self.endpoint.write().await
    }
}
