//! Error types.
//!
//! Every client operation reports failure through [`ClientError`].
//! Transport and TLS failures from the bootstrap stage are carried
//! verbatim; the remaining variants describe protocol-level outcomes
//! such as an unexpected broker reply or an operation attempted
//! without a live connection.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::response::Response;

/// Result alias used throughout the crate.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Failures surfaced by the client, its connections and channels.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker replied, but not with the confirmation the
    /// operation expected.
    #[error("invalid response from broker: {0:?}")]
    InvalidResponse(Response),

    /// No connection is stored, or the connection went away while a
    /// request was waiting for its reply.
    #[error("connection is closed")]
    ConnectionClosed,

    /// `shutdown()` was already called on this client.
    #[error("client has already been shut down")]
    AlreadyShutdown,

    /// A write was submitted to a transport that is no longer active.
    #[error("transport is already closed")]
    AlreadyClosed,

    #[error("connecting to {host}:{port} timed out after {timeout:?}")]
    ConnectTimeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("tls negotiation with {server_name} failed: {source}")]
    TlsHandshake {
        server_name: String,
        #[source]
        source: io::Error,
    },

    #[error("tls configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    #[error("failed to load certificate material from {}: {source}", path.display())]
    Certificate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid tls settings: {0}")]
    TlsSettings(String),

    /// Raised by a frame handler when inbound bytes violate the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("runtime task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("runtime shutdown failed: {0}")]
    RuntimeShutdown(String),
}

/// Failures while loading a [`Configuration`](crate::config::Configuration).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
