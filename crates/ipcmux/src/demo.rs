//! The `demo` channel served by `ipcmux serve`.

use std::time::Duration;

use futures_util::future::{ready, FutureExt};
use futures_util::stream::{BoxStream, StreamExt};
use ipcmux_channel::{CallError, CallFuture, ServerChannel};
use ipcmux_wire::{RemoteError, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const CHANNEL: &str = "demo";

#[derive(Debug, Clone)]
pub struct DemoChannel {
    tick: Duration,
}

impl DemoChannel {
    pub fn new(tick: Duration) -> Self {
        Self { tick }
    }
}

impl ServerChannel<String> for DemoChannel {
    fn call(&self, ctx: &String, command: &str, arg: Value, cancel: CancellationToken) -> CallFuture {
        debug!(ctx = %ctx, command, "demo call");
        match command {
            "echo" => ready(Ok(arg)).boxed(),
            "double" => ready(match arg.as_i64() {
                Some(n) => n
                    .checked_mul(2)
                    .map(Value::from)
                    .ok_or_else(|| CallError::remote("double overflowed")),
                None => Err(CallError::remote(format!(
                    "double expects a number, got {}",
                    arg.kind()
                ))),
            })
            .boxed(),
            "whoami" => ready(Ok(Value::from(ctx.as_str()))).boxed(),
            "fail" => {
                let message = arg.as_str().unwrap_or("requested failure").to_owned();
                ready(Err(CallError::Remote(RemoteError::new(
                    "DemoError",
                    message,
                ))))
                .boxed()
            }
            "sleep" => {
                let millis = arg.as_u64().unwrap_or(1000);
                async move {
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_millis(millis)) => Ok(Value::from(millis)),
                        () = cancel.cancelled() => Err(CallError::Canceled),
                    }
                }
                .boxed()
            }
            other => ready(Err(CallError::unknown_command(other))).boxed(),
        }
    }

    fn listen(&self, ctx: &String, event: &str, _arg: Value) -> Result<BoxStream<'static, Value>, CallError> {
        match event {
            "ticks" => {
                debug!(ctx = %ctx, "demo ticks subscribed");
                Ok(ticks(self.tick))
            }
            other => Err(CallError::unknown_event(other)),
        }
    }
}

/// Counts 1, 2, 3, ... once per `period`, starting one period from now.
fn ticks(period: Duration) -> BoxStream<'static, Value> {
    let interval = tokio::time::interval_at(Instant::now() + period, period);
    futures_util::stream::unfold((interval, 0u64), |(mut interval, seq)| async move {
        interval.tick().await;
        let seq = seq + 1;
        Some((Value::from(seq), (interval, seq)))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> DemoChannel {
        DemoChannel::new(Duration::from_millis(5))
    }

    fn ctx() -> String {
        "tester".to_string()
    }

    #[tokio::test]
    async fn commands_answer_or_fail() {
        let channel = demo();
        let token = CancellationToken::new();

        let echoed = channel.call(&ctx(), "echo", Value::from("hi"), token.clone()).await;
        assert_eq!(echoed, Ok(Value::from("hi")));

        let doubled = channel.call(&ctx(), "double", Value::from(21i64), token.clone()).await;
        assert_eq!(doubled, Ok(Value::from(42i64)));

        let who = channel.call(&ctx(), "whoami", Value::Absent, token.clone()).await;
        assert_eq!(who, Ok(Value::from("tester")));

        match channel.call(&ctx(), "fail", Value::from("nope"), token.clone()).await {
            Err(CallError::Remote(err)) => {
                assert_eq!(err.name, "DemoError");
                assert_eq!(err.message, "nope");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        match channel.call(&ctx(), "missing", Value::Absent, token).await {
            Err(CallError::Remote(err)) => assert!(err.message.contains("missing")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn double_rejects_non_numbers() {
        let result = demo()
            .call(&ctx(), "double", Value::from("x"), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(CallError::Remote(_))));
    }

    #[tokio::test]
    async fn sleep_stops_when_canceled() {
        let token = CancellationToken::new();
        let call = demo().call(&ctx(), "sleep", Value::from(60_000u64), token.clone());
        token.cancel();
        assert_eq!(call.await, Err(CallError::Canceled));
    }

    #[tokio::test]
    async fn ticks_count_up() {
        let stream = demo()
            .listen(&ctx(), "ticks", Value::Absent)
            .expect("ticks should exist");
        let seen: Vec<Value> = stream.take(3).collect().await;
        assert_eq!(
            seen,
            vec![Value::from(1u64), Value::from(2u64), Value::from(3u64)]
        );
    }

    #[test]
    fn unknown_events_are_errors() {
        assert!(demo().listen(&ctx(), "nope", Value::Absent).is_err());
    }
}
