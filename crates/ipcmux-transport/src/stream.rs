use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::frame::{FrameConfig, MessageCodec};
use crate::transport::Transport;

impl Transport {
    /// Adapt a byte stream into a whole-message transport.
    ///
    /// Spawns one reader and one writer task on the current tokio runtime.
    /// The transport closes when the stream hits EOF, on any framing or I/O
    /// error, or when [`Transport::close`] is called. Messages already queued
    /// for sending are flushed before the write half shuts down.
    pub fn from_stream<S>(io: S, config: FrameConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let closed = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(
            FramedRead::new(read_half, MessageCodec::new(config.clone())),
            incoming_tx,
            closed.clone(),
        ));
        tokio::spawn(write_loop(
            FramedWrite::new(write_half, MessageCodec::new(config)),
            outgoing_rx,
            closed.clone(),
        ));

        Transport::from_channels(outgoing_tx, incoming_rx, closed)
    }
}

async fn read_loop<R>(
    mut framed: FramedRead<R, MessageCodec>,
    incoming: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            () = closed.cancelled() => break,
            next = framed.next() => next,
        };

        match next {
            Some(Ok(message)) => {
                if incoming.send(message).is_err() {
                    debug!("receiver dropped; stopping reader");
                    break;
                }
            }
            Some(Err(err)) => {
                warn!(error = %err, "closing transport after read failure");
                break;
            }
            None => {
                debug!("stream reached EOF");
                break;
            }
        }
    }
    closed.cancel();
}

async fn write_loop<W>(
    mut framed: FramedWrite<W, MessageCodec>,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    closed: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            next = outgoing.recv() => next,
            () = closed.cancelled() => break,
        };

        let Some(message) = next else {
            debug!("all senders dropped; stopping writer");
            break;
        };
        if let Err(err) = framed.send(message).await {
            warn!(error = %err, "closing transport after write failure");
            closed.cancel();
            return;
        }
    }

    while let Ok(message) = outgoing.try_recv() {
        if framed.feed(message).await.is_err() {
            break;
        }
    }
    let _ = framed.flush().await;
    let _ = framed.get_mut().shutdown().await;
    closed.cancel();
}
