//! A live broker connection.
//!
//! [`Connection`] is the single correlation point for one transport.
//! Every send pairs its payload with a response slot before it is
//! queued, so the reply the frame handler matches to it is the one
//! the returned future yields.  Submission happens when `send` is
//! called, not when the future is first polled: the order of calls is
//! the order on the wire, and dropping the future does not take the
//! request back.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::debug;

use crate::config::Configuration;
use crate::error::ClientError;
use crate::network::connector::connect_to;
use crate::network::transport::Transport;
use crate::protocol::frame::{Flush, Outbound};
use crate::protocol::handler::FrameHandlerFactory;
use crate::protocol::response::{PendingRequest, Response, ResponseSlot};

#[derive(Debug)]
pub struct Connection {
    transport: Transport,
    runtime: Handle,
}

impl Connection {
    /// Bootstrap a transport on `runtime` and wrap it.
    ///
    /// The bootstrap runs as a task on `runtime`, so the socket is
    /// bound to that runtime's reactor whichever executor awaits this.
    pub async fn open(
        runtime: &Handle,
        config: Arc<Configuration>,
        handlers: Arc<dyn FrameHandlerFactory>,
    ) -> Result<Self, ClientError> {
        let transport = runtime
            .spawn(async move { connect_to(&config, handlers.as_ref()).await })
            .await??;
        Ok(Self {
            transport,
            runtime: runtime.clone(),
        })
    }

    /// Send `payload` and wait for the reply correlated with it.
    pub fn send(
        &self,
        payload: Outbound,
        flush: Flush,
    ) -> impl Future<Output = Result<Response, ClientError>> + Send + 'static {
        let (slot, reply) = ResponseSlot::new();
        let submitted = self.transport.submit(PendingRequest::new(payload, slot), flush);
        async move {
            submitted?;
            match reply.await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::ConnectionClosed),
            }
        }
    }

    /// Close the transport.  Closing an inactive connection succeeds
    /// immediately.
    pub fn close(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let ack = self.transport.request_close();
        let peer = self.transport.peer_addr();
        async move {
            let Some(ack) = ack else {
                debug!(%peer, "close on inactive connection");
                return Ok(());
            };
            // A dropped ack means the driver stopped on its own meanwhile.
            ack.await.unwrap_or(Ok(()))
        }
    }

    /// Resolves once the transport has fully closed, whether the
    /// close was requested locally or came from the peer.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        self.transport.closed()
    }

    pub fn is_active(&self) -> bool {
        self.transport.is_active()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.transport.peer_addr()
    }

    /// The runtime the transport runs on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}
