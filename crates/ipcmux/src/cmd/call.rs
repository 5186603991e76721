use crate::cmd::CallArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = crate::cmd::parse_duration(&args.timeout)?;
    let arg = args.payload.to_value()?;
    crate::cmd::runtime()?.block_on(call(args, arg, timeout, format))
}

#[cfg(not(unix))]
pub fn run(_args: CallArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::cmd::unsupported("call"))
}

#[cfg(unix)]
async fn call(
    args: CallArgs,
    arg: ipcmux_wire::Value,
    timeout: std::time::Duration,
    format: OutputFormat,
) -> CliResult<i32> {
    use ipcmux_channel::{Channel, IpcPeer};
    use tokio_util::sync::CancellationToken;
    use tracing::debug;

    use crate::exit::{call_error, ipc_error, CliError, SUCCESS, TIMEOUT};
    use crate::output::print_call_result;

    let peer = IpcPeer::connect(&args.socket.socket, args.ctx.clone())
        .await
        .map_err(|err| ipc_error("connect failed", err))?;

    let token = CancellationToken::new();
    let pending = peer
        .get_channel(args.channel.as_str())
        .call(&args.command, arg, token.clone());
    let result = tokio::select! {
        result = pending => result,
        () = tokio::time::sleep(timeout) => {
            debug!(timeout_ms = timeout.as_millis() as u64, "call timed out, canceling");
            token.cancel();
            tokio::task::yield_now().await;
            peer.dispose();
            return Err(CliError::new(
                TIMEOUT,
                format!("{}.{} timed out after {}", args.channel, args.command, args.timeout),
            ));
        }
    };
    peer.dispose();

    let value = result.map_err(|err| call_error("call failed", err))?;
    print_call_result(&args.channel, &args.command, &value, format);
    Ok(SUCCESS)
}
