use ipcmux_wire::{RemoteError, Response, Value};

/// Errors raised while setting up or tearing down protocol endpoints.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipcmux_transport::TransportError),

    /// Wire encoding or decoding error.
    #[error("wire error: {0}")]
    Wire(#[from] ipcmux_wire::WireError),

    /// The connecting peer sent a context value we could not use.
    #[error("invalid connection context: {0}")]
    InvalidContext(String),

    /// A protocol message queue was already claimed by another endpoint.
    #[error("{0} queue already attached")]
    AlreadyAttached(&'static str),
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Outcome of a failed call, on either side of the connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// The call was canceled locally or remotely before it completed.
    #[error("canceled")]
    Canceled,

    /// The remote side failed with a structured error.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The remote side rejected the call with an arbitrary value.
    #[error("call rejected with {} value", .0.kind())]
    Rejected(Value),
}

impl CallError {
    /// A structured error with the generic `Error` name.
    pub fn remote(message: impl Into<String>) -> Self {
        CallError::Remote(RemoteError::new(RemoteError::GENERIC_NAME, message))
    }

    pub fn unknown_channel(channel: &str) -> Self {
        Self::remote(format!("Unknown channel: {channel}"))
    }

    pub fn unknown_command(command: &str) -> Self {
        Self::remote(format!("Unknown command: {command}"))
    }

    pub fn unknown_event(event: &str) -> Self {
        Self::remote(format!("Unknown event: {event}"))
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, CallError::Canceled)
    }

    /// The terminal response a server sends for this failure.
    pub(crate) fn into_response(self, id: u64) -> Response {
        match self {
            CallError::Canceled => Response::Error {
                id,
                error: RemoteError::canceled(),
            },
            CallError::Remote(error) => Response::Error { id, error },
            CallError::Rejected(data) => Response::ErrorObj { id, data },
        }
    }
}

impl From<RemoteError> for CallError {
    fn from(error: RemoteError) -> Self {
        if error.is_canceled() {
            CallError::Canceled
        } else {
            CallError::Remote(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_survives_the_wire() {
        let response = CallError::Canceled.into_response(7);
        let Response::Error { id, error } = response else {
            panic!("expected a structured error");
        };
        assert_eq!(id, 7);
        assert_eq!(CallError::from(error), CallError::Canceled);
    }

    #[test]
    fn rejection_maps_to_error_obj() {
        let response = CallError::Rejected(Value::from(3u64)).into_response(1);
        assert_eq!(
            response,
            Response::ErrorObj {
                id: 1,
                data: Value::from(3u64)
            }
        );
    }

    #[test]
    fn remote_errors_keep_their_name() {
        let err = CallError::from(RemoteError::new("TypeError", "boom"));
        assert_eq!(err.to_string(), "remote error: TypeError: boom");
        assert!(!err.is_canceled());
    }
}
