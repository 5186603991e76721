//! Multiplexed RPC and event streaming over one message connection.
//!
//! A [`ChannelServer`] hosts named channels, each exposing commands
//! (single-value async calls) and events (streams). A [`ChannelClient`] on
//! the other end calls commands and subscribes to events through a
//! [`Channel`] proxy, all multiplexed over one [`Transport`].
//!
//! [`IpcPeer`] pairs a client and a server on one connection.
//! [`IpcServer`] accepts many peers and routes calls across them with a
//! [`ClientRouter`] such as [`StaticRouter`].
//!
//! [`Transport`]: ipcmux_transport::Transport

pub mod channel;
pub mod client;
pub mod delayed;
pub mod error;
pub mod event;
pub mod hub;
pub mod peer;
pub mod protocol;
pub mod router;
pub mod server;

pub use channel::{CallFuture, Channel, ServerChannel};
pub use client::{ChannelClient, ChannelProxy, HandshakeState};
pub use delayed::{get_delayed_channel, get_next_tick_channel, DelayedChannel, NextTickChannel};
pub use error::{CallError, IpcError, Result};
pub use event::{Emitter, Event, EventStream, Relay, WeakEmitter};
pub use hub::{Connection, ConnectionHub, IpcServer, RoutedChannel};
pub use peer::IpcPeer;
pub use protocol::Protocol;
pub use router::{ClientRouter, RouteFuture, StaticRouter};
pub use server::ChannelServer;
