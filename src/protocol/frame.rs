//! Outbound units handed to the frame handler.
//!
//! The client never serialises frames itself.  It produces either raw
//! bytes (the protocol header sent before any framing exists) or a
//! structured [`Frame`] addressed to a channel, and leaves the byte
//! layout to the installed [`FrameHandler`](super::handler::FrameHandler).

use bytes::Bytes;

/// Identifies a logical channel on a connection.  Channel 0 carries
/// connection-level traffic; user channels are positive.
pub type ChannelId = u16;

/// The channel used for connection-level methods.
pub const CONNECTION_CHANNEL: ChannelId = 0;

/// Protocol header announcing AMQP 0-9-1, written as soon as the
/// transport is up.
pub const PROTOCOL_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

/// Methods the connection core issues.  Per-channel commands that are
/// not part of the lifecycle travel as [`Method::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    ConnectionClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ChannelOpen,
    ChannelClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    Other {
        class_id: u16,
        method_id: u16,
        arguments: Bytes,
    },
}

/// A method addressed to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel_id: ChannelId,
    pub method: Method,
}

impl Frame {
    pub fn new(channel_id: ChannelId, method: Method) -> Self {
        Self { channel_id, method }
    }

    /// Connection-level close request carrying `code` and `reason`.
    pub fn connection_close(code: u16, reason: &str) -> Self {
        Self::new(
            CONNECTION_CHANNEL,
            Method::ConnectionClose {
                reply_code: code,
                reply_text: reason.to_owned(),
                class_id: 0,
                method_id: 0,
            },
        )
    }

    pub fn channel_open(channel_id: ChannelId) -> Self {
        Self::new(channel_id, Method::ChannelOpen)
    }

    pub fn channel_close(channel_id: ChannelId, code: u16, reason: &str) -> Self {
        Self::new(
            channel_id,
            Method::ChannelClose {
                reply_code: code,
                reply_text: reason.to_owned(),
                class_id: 0,
                method_id: 0,
            },
        )
    }
}

/// A unit submitted for a correlated send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Bytes(Bytes),
    Frame(Frame),
}

impl Outbound {
    /// The channel this unit belongs to.  Raw bytes are connection
    /// level.
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Outbound::Bytes(_) => CONNECTION_CHANNEL,
            Outbound::Frame(frame) => frame.channel_id,
        }
    }
}

impl From<Frame> for Outbound {
    fn from(frame: Frame) -> Self {
        Outbound::Frame(frame)
    }
}

impl From<Bytes> for Outbound {
    fn from(bytes: Bytes) -> Self {
        Outbound::Bytes(bytes)
    }
}

/// How eagerly a correlated send reaches the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Write and flush as soon as the transport picks the unit up.
    /// Used for control traffic such as the protocol header and close.
    Immediately,
    /// May be coalesced with other queued writes.
    Batched,
}
