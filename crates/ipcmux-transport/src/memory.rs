//! In-process transports.
//!
//! Useful for tests and for wiring two components of one process together
//! through the full protocol stack.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::transport::{ClientConnection, Transport};

/// Create two cross-wired transports.
///
/// Whatever one side sends, the other receives, in order. Closing or
/// dropping either side closes both.
pub fn pair() -> (Transport, Transport) {
    let closed = CancellationToken::new();
    let (to_left, left_incoming) = mpsc::unbounded_channel();
    let (to_right, right_incoming) = mpsc::unbounded_channel();

    let left = Transport::from_channels(to_right, left_incoming, closed.clone());
    let right = Transport::from_channels(to_left, right_incoming, closed);
    (left, right)
}

/// Create an in-memory listener and the connector that dials it.
pub fn listener() -> (MemoryListener, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryListener { rx }, MemoryConnector { tx })
}

/// Stream of connections made through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryListener {
    rx: mpsc::UnboundedReceiver<ClientConnection>,
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<ClientConnection> {
        self.rx.recv().await
    }
}

impl Stream for MemoryListener {
    type Item = ClientConnection;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ClientConnection>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Dials a [`MemoryListener`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<ClientConnection>,
}

impl MemoryConnector {
    /// Open a new connection; the listener receives the other end.
    pub fn connect(&self) -> Result<Transport> {
        let (client, server) = pair();
        self.tx
            .send(ClientConnection::new(server))
            .map_err(|_| TransportError::Closed)?;
        debug!("opened in-memory connection");
        Ok(client)
    }
}
