// src/core/errors.rs

//! Defines the primary error type for the entire proxy.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the proxy.
///
/// I/O errors are wrapped in an `Arc` so the enum stays cheaply cloneable.
#[derive(Error, Debug, Clone)]
pub enum BerylError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Malformed RESP on the wire. Rendered to clients verbatim as the
    /// payload of an `-ERR` reply.
    #[error("resp: invalid syntax")]
    SyntaxError,

    /// The buffer does not yet hold one complete frame. Never surfaces past
    /// the codec layer; readers treat it as "need more bytes".
    #[error("incomplete frame")]
    IncompleteFrame,

    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The upstream rejected the `AUTH` handshake.
    #[error("invalid password")]
    InvalidPassword,

    #[error("wrong number of arguments for '{0}' command")]
    WrongArgumentCount(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The promotion target does not appear among the primary's replicas.
    #[error("{0}:{1} is not a slave")]
    NotASlave(String, u16),

    /// The promotion probe loop (or an upstream reply) exceeded its deadline.
    #[error("timed out")]
    Timeout,

    /// `SLAVEOF NO ONE` was rejected; carries the replica's error string
    /// unchanged so it can be relayed to the client as-is.
    #[error("{0}")]
    DemoteRefused(String),

    #[error("unexpected reply from upstream: {0}")]
    UnexpectedReply(String),

    #[error("replication error: {0}")]
    ReplicationError(String),
}

impl From<std::io::Error> for BerylError {
    fn from(e: std::io::Error) -> Self {
        BerylError::Io(Arc::new(e))
    }
}
