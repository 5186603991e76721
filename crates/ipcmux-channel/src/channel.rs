use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use ipcmux_wire::Value;
use tokio_util::sync::CancellationToken;

use crate::error::CallError;
use crate::event::Event;

/// Result of a command invocation.
pub type CallFuture = BoxFuture<'static, Result<Value, CallError>>;

/// A named bundle of commands and events hosted by a channel server.
///
/// `ctx` identifies the connected peer. Implementations that need it inside
/// the returned future must clone what they use.
pub trait ServerChannel<C>: Send + Sync + 'static {
    /// Run `command`. `cancel` fires when the caller cancels the request or
    /// the server is disposed.
    fn call(&self, ctx: &C, command: &str, arg: Value, cancel: CancellationToken) -> CallFuture;

    /// Open the event stream named `event`.
    fn listen(&self, ctx: &C, event: &str, arg: Value) -> Result<BoxStream<'static, Value>, CallError> {
        let _ = (ctx, arg);
        Err(CallError::unknown_event(event))
    }
}

/// Client-side view of a remote channel.
pub trait Channel: Send + Sync {
    /// Invoke `command`. Dropping the returned future before it settles
    /// cancels the call, exactly like firing `token`.
    fn call(&self, command: &str, arg: Value, token: CancellationToken) -> CallFuture;

    /// Subscription point for `event`. The remote subscription exists only
    /// while at least one local subscriber is attached.
    fn listen(&self, event: &str, arg: Value) -> Event<Value>;
}

impl<T: Channel + ?Sized> Channel for Arc<T> {
    fn call(&self, command: &str, arg: Value, token: CancellationToken) -> CallFuture {
        (**self).call(command, arg, token)
    }

    fn listen(&self, event: &str, arg: Value) -> Event<Value> {
        (**self).listen(event, arg)
    }
}
