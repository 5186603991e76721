use std::fmt;
use std::io;

use ipcmux_channel::{CallError, IpcError};
use ipcmux_transport::{FrameError, TransportError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::Frame(FrameError::PayloadTooLarge { .. }) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn ipc_error(context: &str, err: IpcError) -> CliError {
    match err {
        IpcError::Transport(err) => transport_error(context, err),
        IpcError::Wire(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        IpcError::InvalidContext(reason) => CliError::new(
            USAGE,
            format!("{context}: invalid connection context: {reason}"),
        ),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn call_error(context: &str, err: CallError) -> CliError {
    match &err {
        CallError::Canceled => CliError::new(FAILURE, format!("{context}: {err}")),
        CallError::Remote(remote) => CliError::new(
            FAILURE,
            format!("{context}: {}: {}", remote.name, remote.message),
        ),
        CallError::Rejected(value) => CliError::new(
            FAILURE,
            format!("{context}: rejected with {}", value.to_json()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipcmux_wire::{RemoteError, Value};

    #[test]
    fn missing_socket_is_a_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                path: "/tmp/missing.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed"));
    }

    #[test]
    fn remote_errors_keep_name_and_message() {
        let err = call_error(
            "call failed",
            CallError::Remote(RemoteError::new("DemoError", "boom")),
        );
        assert_eq!(err.code, FAILURE);
        assert_eq!(err.message, "call failed: DemoError: boom");
    }

    #[test]
    fn rejected_values_are_printed_as_json() {
        let err = call_error(
            "call failed",
            CallError::Rejected(Value::from(serde_json::json!({"code": 7}))),
        );
        assert_eq!(err.message, r#"call failed: rejected with {"code":7}"#);
    }

    #[test]
    fn invalid_context_is_a_usage_error() {
        let err = ipc_error("connect failed", IpcError::InvalidContext("nope".into()));
        assert_eq!(err.code, USAGE);
    }
}
