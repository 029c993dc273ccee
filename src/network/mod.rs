//! Networking layers.
//!
//! [`connector`] opens plain or TLS streams to the broker,
//! [`tls_util`] builds the rustls configuration it uses, and
//! [`transport`] runs the framed stream once it is up.

pub mod connector;
pub mod tls_util;
pub mod transport;
