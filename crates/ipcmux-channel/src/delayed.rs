//! Channel wrappers that defer or reorder access to another channel.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use ipcmux_wire::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{CallFuture, Channel};
use crate::error::CallError;
use crate::event::{Event, Relay};

type ChannelFuture = Shared<BoxFuture<'static, Result<Arc<dyn Channel>, CallError>>>;

/// A channel that becomes available later.
///
/// Calls wait for `channel` to resolve and then forward. Subscribers may
/// attach before that; they are connected to the real event once it
/// resolves. If `channel` fails, calls fail with the same error and
/// subscriptions end.
pub fn get_delayed_channel<F>(channel: F) -> DelayedChannel
where
    F: Future<Output = Result<Arc<dyn Channel>, CallError>> + Send + 'static,
{
    DelayedChannel {
        channel: channel.boxed().shared(),
    }
}

#[derive(Clone)]
pub struct DelayedChannel {
    channel: ChannelFuture,
}

impl Channel for DelayedChannel {
    fn call(&self, command: &str, arg: Value, token: CancellationToken) -> CallFuture {
        let channel = self.channel.clone();
        let command = command.to_owned();
        async move {
            let channel = tokio::select! {
                resolved = channel => resolved?,
                () = token.cancelled() => return Err(CallError::Canceled),
            };
            channel.call(&command, arg, token).await
        }
        .boxed()
    }

    fn listen(&self, event: &str, arg: Value) -> Event<Value> {
        let relay = Relay::new();
        let output = relay.event();

        let channel = self.channel.clone();
        let event = event.to_owned();
        tokio::spawn(async move {
            match channel.await {
                Ok(channel) => relay.set_input(channel.listen(&event, arg)),
                Err(err) => {
                    debug!(event = %event, error = %err, "delayed channel failed");
                    relay.dispose();
                }
            }
        });
        output
    }
}

impl std::fmt::Debug for DelayedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayedChannel")
            .field("resolved", &self.channel.peek().is_some())
            .finish()
    }
}

/// Wrap `channel` so that nothing reaches it synchronously from the caller's
/// current turn. The first call or subscription is deferred by one scheduler
/// yield; later ones forward directly.
pub fn get_next_tick_channel(channel: Arc<dyn Channel>) -> NextTickChannel {
    NextTickChannel {
        channel,
        did_tick: Arc::new(AtomicBool::new(false)),
    }
}

#[derive(Clone)]
pub struct NextTickChannel {
    channel: Arc<dyn Channel>,
    did_tick: Arc<AtomicBool>,
}

impl Channel for NextTickChannel {
    fn call(&self, command: &str, arg: Value, token: CancellationToken) -> CallFuture {
        if self.did_tick.load(Ordering::Acquire) {
            return self.channel.call(command, arg, token);
        }

        let channel = self.channel.clone();
        let did_tick = self.did_tick.clone();
        let command = command.to_owned();
        async move {
            tokio::task::yield_now().await;
            did_tick.store(true, Ordering::Release);
            channel.call(&command, arg, token).await
        }
        .boxed()
    }

    fn listen(&self, event: &str, arg: Value) -> Event<Value> {
        if self.did_tick.load(Ordering::Acquire) {
            return self.channel.listen(event, arg);
        }

        let relay = Relay::new();
        let output = relay.event();

        let channel = self.channel.clone();
        let did_tick = self.did_tick.clone();
        let event = event.to_owned();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            did_tick.store(true, Ordering::Release);
            relay.set_input(channel.listen(&event, arg));
        });
        output
    }
}

impl std::fmt::Debug for NextTickChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NextTickChannel")
            .field("did_tick", &self.did_tick.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use futures_util::StreamExt;
    use tokio::sync::oneshot;

    use super::*;
    use crate::event::Emitter;

    /// Local channel that echoes its argument and exposes one emitter.
    struct Local {
        calls: AtomicUsize,
        ticks: Emitter<Value>,
    }

    impl Local {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                ticks: Emitter::new(),
            })
        }
    }

    impl Channel for Local {
        fn call(&self, command: &str, arg: Value, _token: CancellationToken) -> CallFuture {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match command {
                "echo" => Ok(arg),
                other => Err(CallError::unknown_command(other)),
            };
            futures_util::future::ready(result).boxed()
        }

        fn listen(&self, _event: &str, _arg: Value) -> Event<Value> {
            self.ticks.event()
        }
    }

    #[tokio::test]
    async fn delayed_calls_wait_for_resolution() {
        let (tx, rx) = oneshot::channel::<Arc<dyn Channel>>();
        let delayed = get_delayed_channel(async move { rx.await.map_err(|_| CallError::Canceled) });

        let pending = tokio::spawn(delayed.call("echo", Value::from("hi"), CancellationToken::new()));
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        let local = Local::new();
        let _ = tx.send(local.clone());
        assert_eq!(pending.await.unwrap(), Ok(Value::from("hi")));
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delayed_failure_reaches_callers() {
        let delayed = get_delayed_channel(async { Err(CallError::remote("no channel")) });
        let result = delayed
            .call("echo", Value::Absent, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CallError::Remote(_))));
    }

    #[tokio::test]
    async fn delayed_listen_connects_early_subscribers() {
        let (tx, rx) = oneshot::channel::<Arc<dyn Channel>>();
        let delayed = get_delayed_channel(async move { rx.await.map_err(|_| CallError::Canceled) });

        let mut stream = delayed.listen("ticks", Value::Absent).subscribe();
        let local = Local::new();
        let _ = tx.send(local.clone());

        while local.ticks.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        local.ticks.fire(Value::from(1u64));
        assert_eq!(stream.next().await, Some(Value::from(1u64)));
    }

    #[tokio::test]
    async fn delayed_failure_ends_subscriptions() {
        let (tx, rx) = oneshot::channel::<Arc<dyn Channel>>();
        let delayed = get_delayed_channel(async move { rx.await.map_err(|_| CallError::Canceled) });

        let mut stream = delayed.listen("ticks", Value::Absent).subscribe();
        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn delayed_call_can_be_canceled_while_waiting() {
        let delayed = get_delayed_channel(futures_util::future::pending());
        let token = CancellationToken::new();
        token.cancel();
        let result = delayed.call("echo", Value::Absent, token).await;
        assert_eq!(result, Err(CallError::Canceled));
    }

    #[tokio::test]
    async fn next_tick_defers_only_the_first_use() {
        let local = Local::new();
        let channel = get_next_tick_channel(local.clone());

        let first = channel.call("echo", Value::from(1u64), CancellationToken::new());
        assert_eq!(local.calls.load(Ordering::SeqCst), 0);
        assert_eq!(first.await, Ok(Value::from(1u64)));
        assert_eq!(local.calls.load(Ordering::SeqCst), 1);

        let second = channel.call("echo", Value::from(2u64), CancellationToken::new());
        assert_eq!(local.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.await, Ok(Value::from(2u64)));
    }

    #[tokio::test]
    async fn next_tick_listen_goes_through_a_relay() {
        let local = Local::new();
        let channel = get_next_tick_channel(local.clone());

        let mut stream = channel.listen("ticks", Value::Absent).subscribe();
        assert_eq!(local.ticks.listener_count(), 0);
        while local.ticks.listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        local.ticks.fire(Value::from(7u64));
        assert_eq!(stream.next().await, Some(Value::from(7u64)));
    }
}
