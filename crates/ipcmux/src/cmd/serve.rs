use std::time::Duration;

use crate::cmd::ServeArgs;
use crate::exit::CliResult;
use crate::output::OutputFormat;

#[cfg(unix)]
pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let tick = Duration::from_millis(args.tick_ms.max(1));
    crate::cmd::runtime()?.block_on(serve(args, tick, format))
}

#[cfg(not(unix))]
pub fn run(_args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::cmd::unsupported("serve"))
}

#[cfg(unix)]
async fn serve(args: ServeArgs, tick: Duration, format: OutputFormat) -> CliResult<i32> {
    use ipcmux_channel::IpcServer;
    use ipcmux_transport::UnixSocketListener;
    use tracing::info;

    use crate::cmd::shutdown_signal;
    use crate::demo::{DemoChannel, CHANNEL};
    use crate::exit::{transport_error, SUCCESS};
    use crate::output::print_serving;

    let path = args.socket.socket;
    let listener =
        UnixSocketListener::bind(&path).map_err(|err| transport_error("bind failed", err))?;
    let hub: IpcServer<String> = IpcServer::new(listener.incoming());
    hub.register_channel(CHANNEL, DemoChannel::new(tick));

    info!(socket = %path.display(), tick_ms = tick.as_millis() as u64, "hub listening");
    print_serving(&path, format);

    shutdown_signal().await?;
    info!(connections = hub.connections().len(), "shutting down");
    hub.dispose();
    Ok(SUCCESS)
}
