/// Errors that can occur while encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The input ended before a complete value was read.
    #[error("truncated value (needed {needed} bytes, {remaining} remaining)")]
    Truncated { needed: usize, remaining: usize },

    /// The value tag is not one of the known kinds.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    /// A string payload was not valid UTF-8.
    #[error("invalid utf-8 in string value: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// A structured payload could not be serialized or parsed as JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lists nested deeper than the decoder allows.
    #[error("value nested too deeply (max depth {max})")]
    TooDeep { max: usize },

    /// A payload does not fit the 4-byte length field.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Bytes were left over after a complete message was decoded.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// The header discriminator is not a known request or response type.
    #[error("unknown message type {0}")]
    UnknownMessageType(u64),

    /// The header does not have the shape its discriminator requires.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The value has a different kind than the caller asked for.
    #[error("expected {expected}, found {found}")]
    UnexpectedKind {
        expected: &'static str,
        found: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, WireError>;
