use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::{Result, TransportError};

/// A whole-message duplex connection.
///
/// This is the capability the protocol layer consumes: `send` one message,
/// receive whole messages in FIFO order. Both halves share one close token;
/// once it fires, sending fails and receiving ends after any already
/// delivered messages are drained.
#[derive(Debug)]
pub struct Transport {
    sender: MessageSender,
    receiver: MessageReceiver,
}

impl Transport {
    /// Assemble a transport from raw channel halves.
    ///
    /// `outgoing` carries messages to the remote side, `incoming` delivers
    /// messages from it.
    pub fn from_channels(
        outgoing: mpsc::UnboundedSender<Bytes>,
        incoming: mpsc::UnboundedReceiver<Bytes>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            sender: MessageSender {
                tx: outgoing,
                closed: closed.clone(),
            },
            receiver: MessageReceiver::new(incoming, closed),
        }
    }

    /// Send one whole message.
    pub fn send(&self, message: Bytes) -> Result<()> {
        self.sender.send(message)
    }

    /// Receive the next whole message, or `None` once closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Borrow the sending half.
    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (MessageSender, MessageReceiver) {
        (self.sender, self.receiver)
    }

    /// Token that fires when the connection closes from either side.
    pub fn closed_token(&self) -> CancellationToken {
        self.sender.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.closed.is_cancelled()
    }

    /// Close both directions.
    pub fn close(&self) {
        self.sender.close();
    }
}

/// Cloneable sending half of a [`Transport`].
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
}

impl MessageSender {
    /// Queue one whole message for delivery. Never blocks.
    pub fn send(&self, message: Bytes) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Close the connection this sender belongs to.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Token that fires when the connection closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Receiving half of a [`Transport`]. Also usable as a [`Stream`].
///
/// When every sender feeding it is gone the remote side has hung up, so the
/// shared close token is fired as well.
pub struct MessageReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
    token: CancellationToken,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl MessageReceiver {
    fn new(rx: mpsc::UnboundedReceiver<Bytes>, closed: CancellationToken) -> Self {
        Self {
            rx,
            closed: Box::pin(closed.clone().cancelled_owned()),
            token: closed,
        }
    }

    /// Receive the next whole message, or `None` once closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Poll for the next message. Delivered messages win over the close signal.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => return Poll::Ready(Some(message)),
            Poll::Ready(None) => {
                self.token.cancel();
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }
        match self.closed.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for MessageReceiver {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.get_mut().poll_recv(cx)
    }
}

impl std::fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceiver").finish_non_exhaustive()
    }
}

/// A newly accepted connection as reported to a connection hub.
#[derive(Debug)]
pub struct ClientConnection {
    /// The connection itself.
    pub transport: Transport,
    /// Fires when the client disconnects.
    pub disconnected: CancellationToken,
}

impl ClientConnection {
    pub fn new(transport: Transport) -> Self {
        let disconnected = transport.closed_token();
        Self {
            transport,
            disconnected,
        }
    }
}
