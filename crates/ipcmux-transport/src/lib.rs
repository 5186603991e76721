//! Whole-message duplex transports.
//!
//! The protocol layer only needs one thing from a connection: send a whole
//! message, receive whole messages in order, learn when it closed. This
//! crate provides that capability as [`Transport`] over:
//! - in-process channels ([`memory`])
//! - any tokio byte stream, framed with a small length-prefixed header
//!   ([`Transport::from_stream`])
//! - Unix domain sockets ([`UnixSocketListener`])

pub mod error;
pub mod frame;
pub mod memory;
mod stream;
pub mod transport;

#[cfg(unix)]
pub mod uds;

pub use error::{FrameError, Result, TransportError};
pub use frame::{FrameConfig, MessageCodec};
pub use transport::{ClientConnection, MessageReceiver, MessageSender, Transport};

#[cfg(unix)]
pub use uds::UnixSocketListener;
