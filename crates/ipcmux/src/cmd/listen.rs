use crate::cmd::ListenArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let arg = args.payload.to_value()?;
    crate::cmd::runtime()?.block_on(listen(args, arg, format))
}

#[cfg(not(unix))]
pub fn run(_args: ListenArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::cmd::unsupported("listen"))
}

#[cfg(unix)]
async fn listen(args: ListenArgs, arg: ipcmux_wire::Value, format: OutputFormat) -> CliResult<i32> {
    use ipcmux_channel::{Channel, IpcPeer};
    use tracing::info;

    use crate::cmd::shutdown_signal;
    use crate::exit::{ipc_error, CliError, SUCCESS, TRANSPORT_ERROR};
    use crate::output::print_event;

    let peer = IpcPeer::connect(&args.socket.socket, args.ctx.clone())
        .await
        .map_err(|err| ipc_error("connect failed", err))?;
    let closed = peer.closed();

    let mut events = peer
        .get_channel(args.channel.as_str())
        .listen(&args.event, arg)
        .subscribe();
    info!(channel = %args.channel, event = %args.event, "subscribed");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut seq = 0u64;
    loop {
        let next = tokio::select! {
            next = events.recv() => next,
            () = closed.cancelled() => None,
            res = &mut shutdown => {
                res?;
                break;
            }
        };
        let Some(value) = next else {
            peer.dispose();
            return Err(CliError::new(TRANSPORT_ERROR, "connection closed by hub"));
        };

        seq += 1;
        print_event(&args.channel, &args.event, seq, &value, format);
        if args.count.is_some_and(|count| seq >= count) {
            break;
        }
    }

    drop(events);
    peer.dispose();
    Ok(SUCCESS)
}
