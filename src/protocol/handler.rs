//! Frame handler seam.
//!
//! The wire codec is not part of this crate.  It plugs in as a
//! [`FrameHandler`] installed on each transport during bootstrap, and
//! owns the correlation of inbound frames to outstanding
//! [`ResponseSlot`](super::response::ResponseSlot)s.  The transport
//! driver calls the handler from a single task, so implementations
//! need no internal locking.

use bytes::BytesMut;

use super::response::PendingRequest;
use crate::config::Configuration;
use crate::error::ClientError;

/// A pipeline stage translating between correlated requests and bytes.
pub trait FrameHandler: Send + 'static {
    /// Serialise `request.payload` into `dst` and keep `request.slot`
    /// until the matching reply arrives.
    fn on_outbound(&mut self, request: PendingRequest, dst: &mut BytesMut) -> Result<(), ClientError>;

    /// Consume whatever complete frames `src` holds, resolving slots
    /// as replies are recognised.  Partial frames stay in `src`.
    /// Frames the handler answers on its own (heartbeats, tuning)
    /// go into `dst` and are written right away.
    ///
    /// Returning an error tears the transport down.
    fn on_inbound(&mut self, src: &mut BytesMut, dst: &mut BytesMut) -> Result<(), ClientError>;

    /// The transport is gone.  Every slot still held must be failed
    /// or dropped.
    fn on_closed(&mut self, cause: Option<&ClientError>);
}

/// Builds a fresh [`FrameHandler`] for each new transport.
pub trait FrameHandlerFactory: Send + Sync + 'static {
    fn new_handler(&self, config: &Configuration) -> Box<dyn FrameHandler>;
}

impl<F> FrameHandlerFactory for F
where
    F: Fn(&Configuration) -> Box<dyn FrameHandler> + Send + Sync + 'static,
{
    fn new_handler(&self, config: &Configuration) -> Box<dyn FrameHandler> {
        self(config)
    }
}
