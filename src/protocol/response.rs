//! Broker replies and the slots that carry them back to callers.
//!
//! Every correlated send pairs its outbound unit with a
//! [`ResponseSlot`].  The frame handler keeps the slot until it has
//! matched an inbound frame to it and then resolves it exactly once.
//! A slot dropped without being resolved reaches the waiter as
//! [`ClientError::ConnectionClosed`], so a request is never left
//! hanging.

use tokio::sync::oneshot;

use super::frame::{ChannelId, Frame, Outbound};
use crate::channel::ChannelNotifier;
use crate::error::ClientError;

/// Parameters confirmed by the broker once startup completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected {
    pub channel_max: u16,
    pub frame_max: u32,
}

#[derive(Debug, Clone)]
pub enum ConnectionResponse {
    Connected(Connected),
    Closed,
}

#[derive(Debug, Clone)]
pub enum ChannelResponse {
    /// The broker opened `channel_id`.  The notifier is the one the
    /// frame handler publishes that channel's inbound events on.
    Opened {
        channel_id: ChannelId,
        notifier: ChannelNotifier,
    },
    Closed {
        channel_id: ChannelId,
    },
    /// Any other method reply on a channel.
    Reply {
        channel_id: ChannelId,
        frame: Frame,
    },
}

/// A decoded reply, as produced by the frame handler.
#[derive(Debug, Clone)]
pub enum Response {
    Connection(ConnectionResponse),
    Channel(ChannelResponse),
}

/// One-shot slot resolved by the frame handler.
#[derive(Debug)]
pub struct ResponseSlot {
    tx: oneshot::Sender<Result<Response, ClientError>>,
}

/// Receiving half of a [`ResponseSlot`].
pub(crate) type ResponseReceiver = oneshot::Receiver<Result<Response, ClientError>>;

impl ResponseSlot {
    pub(crate) fn new() -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Resolve with a decoded reply.
    pub fn succeed(self, response: Response) {
        // The waiter may have given up on the future; nothing to do then.
        let _ = self.tx.send(Ok(response));
    }

    /// Resolve with a failure.
    pub fn fail(self, error: ClientError) {
        let _ = self.tx.send(Err(error));
    }

    /// Whether the caller has dropped the future waiting on this slot.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An outbound unit paired with the slot its reply resolves.
#[derive(Debug)]
pub struct PendingRequest {
    pub payload: Outbound,
    pub slot: ResponseSlot,
}

impl PendingRequest {
    pub fn new(payload: Outbound, slot: ResponseSlot) -> Self {
        Self { payload, slot }
    }

    pub fn into_parts(self) -> (Outbound, ResponseSlot) {
        (self.payload, self.slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slot_resolves_once_with_value() {
        let (slot, rx) = ResponseSlot::new();
        slot.succeed(Response::Connection(ConnectionResponse::Closed));
        let outcome = rx.await.unwrap();
        assert!(matches!(
            outcome,
            Ok(Response::Connection(ConnectionResponse::Closed))
        ));
    }

    #[tokio::test]
    async fn dropped_slot_is_observed_by_waiter() {
        let (slot, rx) = ResponseSlot::new();
        drop(slot);
        assert!(rx.await.is_err());
    }

    #[test]
    fn abandoned_slot_is_detectable() {
        let (slot, rx) = ResponseSlot::new();
        assert!(!slot.is_abandoned());
        drop(rx);
        assert!(slot.is_abandoned());
        slot.fail(ClientError::ConnectionClosed);
    }
}
