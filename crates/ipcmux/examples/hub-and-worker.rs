//! Hub and worker example: both sides serve a channel to each other.
//!
//! Run with:
//!   cargo run --example hub-and-worker

use std::sync::Arc;

use futures_util::future::{ready, FutureExt};
use ipcmux::channel::{
    CallError, CallFuture, Channel, ClientRouter, IpcPeer, IpcServer, ServerChannel, StaticRouter,
};
use ipcmux::transport::memory;
use ipcmux::wire::Value;
use tokio_util::sync::CancellationToken;

/// Served by the hub to every connection.
struct Greeter;

impl ServerChannel<String> for Greeter {
    fn call(&self, ctx: &String, command: &str, arg: Value, _cancel: CancellationToken) -> CallFuture {
        let result = match command {
            "hello" => Ok(Value::from(format!(
                "hello {ctx}, you said {}",
                arg.as_str().unwrap_or("nothing")
            ))),
            other => Err(CallError::unknown_command(other)),
        };
        ready(result).boxed()
    }
}

/// Served by the worker back to the hub.
struct Math;

impl ServerChannel<String> for Math {
    fn call(&self, _ctx: &String, command: &str, arg: Value, _cancel: CancellationToken) -> CallFuture {
        let result = match (command, arg.as_i64()) {
            ("square", Some(n)) => Ok(Value::from(n * n)),
            ("square", None) => Err(CallError::remote("square expects a number")),
            (other, _) => Err(CallError::unknown_command(other)),
        };
        ready(result).boxed()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (listener, connector) = memory::listener();
    let hub: IpcServer<String> = IpcServer::new(listener);
    hub.register_channel("greeter", Greeter);

    let worker = IpcPeer::new(connector.connect()?, "worker-1".to_string())?;
    worker.register_channel("math", Math);

    let greeting = worker
        .get_channel("greeter")
        .call("hello", Value::from("hi"), CancellationToken::new())
        .await?;
    eprintln!("[worker] {}", greeting.as_str().unwrap_or_default());

    let router: Arc<dyn ClientRouter<String>> =
        Arc::new(StaticRouter::new(|ctx: &String| ctx.starts_with("worker")));
    let math = hub.get_channel("math", router);
    let squared = math
        .call("square", Value::from(12i64), CancellationToken::new())
        .await?;
    eprintln!("[hub] 12 squared on a worker = {}", squared.to_json());

    worker.dispose();
    hub.dispose();
    Ok(())
}
