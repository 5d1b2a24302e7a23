//! # easychat-client
//!
//! Client library for EasyChat.
//!
//! This crate provides:
//! - Async TCP connection with exact-length framing
//! - A background dispatcher that routes inbound frames by kind
//! - A shared session directory (identity and name/id cache)
//! - Name resolution that waits on asynchronously delivered answers
//! - A high-level API for every chat operation

pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod directory;
pub mod dispatcher;
pub mod error;

#[cfg(test)]
mod test_server;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, NetworkConfig, ResolveConfig};
pub use connection::{Connection, ConnectionConfig, ConnectionState};
pub use correlator::RequestCorrelator;
pub use directory::{PendingLookup, SessionDirectory, SessionIdentity};
pub use dispatcher::{
    read_frame, ClientEvent, ErrorCallback, Handlers, MessageCallback, PendingReplies,
    ReceiveDispatcher,
};
pub use error::ClientError;
