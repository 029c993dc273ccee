//! Protocol-facing types.
//!
//! The modules here describe what flows across the frame handler
//! seam: outbound units ([`frame`]), replies and their slots
//! ([`response`]) and the handler traits themselves ([`handler`]).

pub mod frame;
pub mod handler;
pub mod response;
