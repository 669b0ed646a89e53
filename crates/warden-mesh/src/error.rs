//! Error types for the signal mesh.

use std::net::SocketAddr;

use thiserror::Error;

use crate::socket::SocketState;

/// Result type for mesh operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in mesh operations.
///
/// Malformed datagrams, filtered signals and failing handlers are not errors
/// at this level: the receive loop logs and drops them.
#[derive(Debug, Error)]
pub enum Error {
    /// The UDP endpoint could not be bound.
    #[error("failed to bind mesh socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The socket is in the wrong lifecycle state for the requested operation.
    #[error("invalid socket state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: SocketState,
    },

    /// No peer with this name is configured.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The socket is not listening, so nothing can be sent.
    #[error("mesh socket is not listening")]
    NotListening,

    /// Invalid configuration entry
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
