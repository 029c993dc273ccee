//! Logical channels.
//!
//! A [`Channel`] is a handle to one multiplexed stream on a
//! [`Connection`].  It does not own any transport state of its own:
//! sends are tagged with the channel's ID and go through the shared
//! connection, and inbound per-channel traffic arrives on the
//! [`ChannelNotifier`] the frame handler handed over when the broker
//! confirmed the open.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::connection::Connection;
use crate::error::ClientError;
use crate::protocol::frame::{ChannelId, Flush, Frame, Method};
use crate::protocol::response::{ChannelResponse, Response};

const NOTIFIER_CAPACITY: usize = 64;

/// Something the broker pushed on a channel outside request/reply.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Frame(Frame),
    /// The broker closed the channel.
    Closed { reply_code: u16, reply_text: String },
}

/// Fan-out of [`ChannelEvent`]s for one channel.  The frame handler
/// keeps a clone and publishes; channel handles subscribe.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    events: broadcast::Sender<ChannelEvent>,
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new(NOTIFIER_CAPACITY)
    }
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { events }
    }

    /// Publish an event; returns how many subscribers received it.
    pub fn notify(&self, event: ChannelEvent) -> usize {
        self.events.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }
}

/// Handle to an open channel.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    runtime: Handle,
    notifier: ChannelNotifier,
    connection: Arc<Connection>,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, runtime: Handle, notifier: ChannelNotifier, connection: Arc<Connection>) -> Self {
        Self {
            id,
            runtime,
            notifier,
            connection,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn notifier(&self) -> &ChannelNotifier {
        &self.notifier
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.notifier.subscribe()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Send `method` on this channel and wait for the correlated reply.
    pub async fn send(&self, method: Method, flush: Flush) -> Result<Response, ClientError> {
        self.connection
            .send(Frame::new(self.id, method).into(), flush)
            .await
    }

    /// Close the channel.  Succeeds only when the broker confirms the
    /// close for this channel's ID.
    pub async fn close(&self, reason: &str, code: u16) -> Result<(), ClientError> {
        let response = self
            .connection
            .send(Frame::channel_close(self.id, code, reason).into(), Flush::Immediately)
            .await?;
        match response {
            Response::Channel(ChannelResponse::Closed { channel_id }) if channel_id == self.id => {
                debug!(channel = self.id, "channel closed");
                Ok(())
            }
            other => Err(ClientError::InvalidResponse(other)),
        }
    }

    /// Run `callback` for every event on this channel, on the
    /// channel's runtime, until the notifier goes away.  Events missed
    /// because the callback fell behind are skipped.
    pub fn on_event<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(ChannelEvent) + Send + 'static,
    {
        let mut events = self.subscribe();
        let channel = self.id;
        self.runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(channel, missed, "channel listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
