//! Multiplexed RPC and event streaming over a single IPC connection.
//!
//! ipcmux lets two processes expose named channels to each other over one
//! message connection. Each channel offers commands (request/response with
//! cancellation) and events (lazily subscribed streams).
//!
//! # Crate Structure
//!
//! - [`wire`]: self-describing value codec and protocol message headers
//! - [`transport`]: whole-message transports (in-memory, framed streams, Unix sockets)
//! - [`channel`]: channel server/client, peers, the connection hub and routers

/// Re-export wire types.
pub mod wire {
    pub use ipcmux_wire::*;
}

/// Re-export transport types.
pub mod transport {
    pub use ipcmux_transport::*;
}

/// Re-export channel types.
pub mod channel {
    pub use ipcmux_channel::*;
}
