//! Connector for outgoing broker connections.
//!
//! [`connect_to`] turns a [`Configuration`] into a running
//! [`Transport`]: it resolves the host, opens a tuned TCP socket
//! within the connect timeout, runs the TLS handshake when the
//! configuration asks for one, and installs a fresh frame handler on
//! the stream before handing it back.  Every stage reports failure
//! through the same `Result`, so callers see one error path whether
//! the TLS settings were bad, the name did not resolve or the broker
//! refused the connection.

use std::io;
use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use super::tls_util::{make_client_config, server_name};
use super::transport::{Io, Transport};
use crate::config::{Configuration, TransportMode};
use crate::error::ClientError;
use crate::protocol::handler::FrameHandlerFactory;

/// Connect to the configured broker and install a frame handler.
///
/// Must run inside the tokio runtime the transport should live on.
pub async fn connect_to(
    config: &Configuration,
    handlers: &dyn FrameHandlerFactory,
) -> Result<Transport, ClientError> {
    let host = config.server.host.as_str();
    let port = config.server.port;

    // TLS material is checked before any network traffic.
    let tls = match &config.transport {
        TransportMode::Plain => None,
        TransportMode::Tls { settings, .. } => {
            let connector = TlsConnector::from(make_client_config(settings.as_ref())?);
            Some((connector, server_name(config.server_name())?))
        }
    };

    let connect_timeout = config.connect_timeout();
    let (stream, peer) = timeout(connect_timeout, open_socket(host, port))
        .await
        .map_err(|_| ClientError::ConnectTimeout {
            host: host.to_owned(),
            port,
            timeout: connect_timeout,
        })??;

    let io: Box<dyn Io> = match tls {
        None => Box::new(stream),
        Some((connector, name)) => {
            let stream = connector
                .connect(name, stream)
                .await
                .map_err(|source| ClientError::TlsHandshake {
                    server_name: config.server_name().to_owned(),
                    source,
                })?;
            Box::new(stream)
        }
    };

    info!(%peer, tls = config.is_tls(), "connected to broker");
    Ok(Transport::spawn(io, handlers.new_handler(config), peer))
}

/// Try each resolved address in turn with address reuse and no-delay
/// enabled.
async fn open_socket(host: &str, port: u16) -> Result<(TcpStream, SocketAddr), ClientError> {
    let mut last_error = None;
    for addr in lookup_host((host, port)).await? {
        debug!(%addr, "attempting connection");
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok((stream, addr));
            }
            Err(error) => {
                debug!(%addr, %error, "connection attempt failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{host} did not resolve to any address")))
        .into())
}
