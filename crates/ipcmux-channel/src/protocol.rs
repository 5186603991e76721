use bytes::Bytes;
use ipcmux_transport::{MessageReceiver, MessageSender, Transport};
use ipcmux_wire::{Message, Request, Response};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{IpcError, Result};

/// One connection, split into the request and response message streams.
///
/// A single task decodes every incoming message and queues requests for
/// the [`ChannelServer`](crate::ChannelServer) and responses for the
/// [`ChannelClient`](crate::ChannelClient) sharing this connection. Each
/// queue buffers until its consumer attaches.
#[derive(Debug)]
pub struct Protocol {
    sender: MessageSender,
    requests: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    responses: Mutex<Option<mpsc::UnboundedReceiver<Response>>>,
}

impl Protocol {
    /// Start demultiplexing `transport`. Must be called inside a tokio runtime.
    pub fn new(transport: Transport) -> Self {
        let (sender, receiver) = transport.split();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        tokio::spawn(demux(receiver, request_tx, response_tx));

        Self {
            sender,
            requests: Mutex::new(Some(request_rx)),
            responses: Mutex::new(Some(response_rx)),
        }
    }

    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Fires once the underlying connection closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.sender.closed_token()
    }

    pub fn close(&self) {
        self.sender.close();
    }

    pub(crate) fn take_requests(&self) -> Result<mpsc::UnboundedReceiver<Request>> {
        self.requests
            .lock()
            .take()
            .ok_or(IpcError::AlreadyAttached("request"))
    }

    pub(crate) fn take_responses(&self) -> Result<mpsc::UnboundedReceiver<Response>> {
        self.responses
            .lock()
            .take()
            .ok_or(IpcError::AlreadyAttached("response"))
    }
}

async fn demux(
    mut receiver: MessageReceiver,
    requests: mpsc::UnboundedSender<Request>,
    responses: mpsc::UnboundedSender<Response>,
) {
    while let Some(raw) = receiver.recv().await {
        match Message::decode(&raw) {
            Ok(Message::Request(request)) => {
                trace!(id = request.id(), "request received");
                let _ = requests.send(request);
            }
            Ok(Message::Response(response)) => {
                trace!(kind = response.kind(), id = ?response.id(), "response received");
                let _ = responses.send(response);
            }
            Err(err) => warn!(error = %err, len = raw.len(), "dropping undecodable message"),
        }
    }
    debug!("connection closed");
}

/// Encode and send one message, logging instead of failing.
pub(crate) fn send_message(sender: &MessageSender, encoded: ipcmux_wire::Result<Bytes>) {
    let message = match encoded {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "failed to encode outgoing message");
            return;
        }
    };
    if let Err(err) = sender.send(message) {
        debug!(error = %err, "dropping outgoing message");
    }
}
