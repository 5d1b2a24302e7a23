//! Client error types.

use easychat_protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("could not resolve user '{name}' within {timeout:?}")]
    ResolveTimeout { name: String, timeout: Duration },

    #[error("not logged in")]
    NotAuthenticated,

    #[error("login rejected: {0}")]
    LoginRejected(String),

    #[error("registration rejected: {0}")]
    RegisterRejected(String),

    #[error("user not found: {0}")]
    UserNotFound(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    ///
    /// Transport errors need a fresh connection first; the client never
    /// reconnects on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::ConnectFailed { .. } => true,
            ClientError::Timeout => true,
            ClientError::ConnectionClosed => true,
            ClientError::WriteFailed(_) => true,
            ClientError::ResolveTimeout { .. } => true,
            _ => false,
        }
    }
}
