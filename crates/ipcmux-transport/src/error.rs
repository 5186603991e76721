use std::path::PathBuf;

/// Failures while opening, accepting or using a message transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be created at `path`.
    #[error("cannot listen on {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No server answered at `path`.
    #[error("cannot reach {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A byte-stream connection produced or was asked to send a bad frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// `path` does not fit in `sockaddr_un`.
    #[error("socket path {path} is {len} bytes, limit is {max}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The other side, or this side, already closed the transport.
    #[error("transport closed")]
    Closed,
}

/// Failures of the length-prefixed framing used on byte streams.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Header did not start with `b"IM"`; the stream is out of sync.
    #[error("bad frame header magic, expected \"IM\"")]
    InvalidMagic,

    /// A message is larger than [`FrameConfig::max_payload_size`](crate::FrameConfig).
    #[error("message of {size} bytes exceeds frame limit of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("frame i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
