//! Client configuration.
//!
//! The [`Configuration`] structure describes where the broker lives
//! and how to reach it.  It is immutable once handed to a
//! [`Client`](crate::client::Client) and can be built in code or read
//! from a TOML file.  Credentials, virtual host and connection name
//! are not interpreted by the connection core; they are passed to the
//! frame handler, which performs the broker-side negotiation.
//!
//! Example `client.toml`:
//!
//! ```toml
//! [server]
//! host = "broker.internal"
//! port = 5671
//! user = "orders"
//! password = "s3cret"
//! vhost = "/orders"
//! connect_timeout_ms = 5000
//!
//! [transport]
//! mode = "tls"
//! sni_server_name = "rabbit.example.com"
//!
//! [transport.settings]
//! ca_file = "certs/ca.pem"
//! ```
//!
//! When the `[transport]` table is omitted a plain TCP connection is
//! used.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default AMQP port for plain TCP.
pub const DEFAULT_PORT: u16 = 5672;
/// Default AMQP port for TLS.
pub const DEFAULT_TLS_PORT: u16 = 5671;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Top‑level configuration structure.  Each section corresponds to
/// a table in the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    /// Broker address, credentials and timeouts.
    #[serde(default)]
    pub server: ServerSection,
    /// Plain or TLS transport.
    #[serde(default)]
    pub transport: TransportMode,
}

/// Broker location and session parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Upper bound for name resolution plus TCP connect, in
    /// milliseconds.  Requests made after the connection is up have
    /// no built-in timeout.
    pub connect_timeout_ms: u64,
    /// Optional client-provided connection name shown by the broker.
    pub connection_name: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            user: "guest".into(),
            password: "guest".into(),
            vhost: "/".into(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            connection_name: None,
        }
    }
}

/// Transport selection.  Exactly one mode is active at a time.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Plain,
    Tls {
        /// Trust and identity material.  `None` trusts the bundled
        /// webpki roots and presents no client certificate.
        #[serde(default)]
        settings: Option<TlsSettings>,
        /// Server name used for SNI and certificate verification.
        /// Falls back to the configured host.
        #[serde(default)]
        sni_server_name: Option<String>,
    },
}

/// PEM file locations for TLS.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// CA certificates to trust instead of the bundled roots.
    pub ca_file: Option<PathBuf>,
    /// Client certificate chain for mutual TLS.  Requires `client_key`.
    pub client_cert: Option<PathBuf>,
    /// Private key matching `client_cert`.
    pub client_key: Option<PathBuf>,
}

impl Configuration {
    /// A plain TCP configuration for `host:port` with default
    /// credentials.
    pub fn plain(host: impl Into<String>, port: u16) -> Self {
        Self {
            server: ServerSection {
                host: host.into(),
                port,
                ..ServerSection::default()
            },
            transport: TransportMode::Plain,
        }
    }

    /// A TLS configuration for `host:port`.
    pub fn tls(
        host: impl Into<String>,
        port: u16,
        settings: Option<TlsSettings>,
        sni_server_name: Option<String>,
    ) -> Self {
        Self {
            server: ServerSection {
                host: host.into(),
                port,
                ..ServerSection::default()
            },
            transport: TransportMode::Tls {
                settings,
                sni_server_name,
            },
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.server.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.server.user = user.into();
        self.server.password = password.into();
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.server.vhost = vhost.into();
        self
    }

    pub fn with_connection_name(mut self, name: impl Into<String>) -> Self {
        self.server.connection_name = Some(name.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.server.connect_timeout_ms)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.transport, TransportMode::Tls { .. })
    }

    /// The name presented for SNI and certificate checks: the
    /// explicit override when configured, otherwise the host.
    pub fn server_name(&self) -> &str {
        match &self.transport {
            TransportMode::Tls {
                sni_server_name: Some(name),
                ..
            } => name,
            _ => &self.server.host,
        }
    }

    /// Load configuration from a file.  See the top of this file for
    /// an example configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }
}
