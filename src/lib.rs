//! Connection core of the Rabbit messaging client.
//!
//! The crate opens a single transport to a broker, runs the protocol
//! startup, multiplexes the connection into channels and pairs each
//! outbound request with its reply.  The wire codec is not part of
//! it: a [`FrameHandler`](protocol::handler::FrameHandler) supplied
//! by the caller is installed on every transport and does the
//! encoding, decoding and reply matching.
//!
//! If you are new to the codebase start with [`client`], which shows
//! how the pieces fit together:
//!
//! - [`config`] describes where the broker is and how to reach it;
//! - [`network`] opens plain or TLS streams and runs them;
//! - [`connection`] correlates sends with replies on one transport;
//! - [`channel`] is the handle for one multiplexed stream.

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod network;
pub mod protocol;

pub use channel::{Channel, ChannelEvent, ChannelNotifier};
pub use client::{Client, RuntimeOwnership, DEFAULT_CLOSE_CODE};
pub use config::{Configuration, TlsSettings, TransportMode};
pub use connection::Connection;
pub use error::{ClientError, ConfigError};
pub use protocol::frame::{ChannelId, Flush, Frame, Method, Outbound, PROTOCOL_HEADER};
pub use protocol::handler::{FrameHandler, FrameHandlerFactory};
pub use protocol::response::{
    ChannelResponse, Connected, ConnectionResponse, PendingRequest, Response, ResponseSlot,
};
