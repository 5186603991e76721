use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use ipcmux_wire::Value;

use crate::exit::{io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod listen;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a hub that serves the demo channel.
    Serve(ServeArgs),
    /// Call a command on a hub channel and print the result.
    Call(CallArgs),
    /// Subscribe to a hub channel event and print what it fires.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct SocketArgs {
    /// Unix socket path of the hub.
    #[arg(long, short = 's', env = "IPCMUX_SOCKET", value_name = "PATH")]
    pub socket: PathBuf,
}

#[derive(Args, Debug, Default)]
pub struct PayloadArgs {
    /// JSON argument.
    #[arg(long, conflicts_with = "data")]
    pub json: Option<String>,
    /// Raw string argument.
    #[arg(long, conflicts_with = "json")]
    pub data: Option<String>,
}

impl PayloadArgs {
    /// The argument value to send; absent when neither flag is given.
    pub fn to_value(&self) -> CliResult<Value> {
        if let Some(json) = &self.json {
            let parsed = serde_json::from_str::<serde_json::Value>(json)
                .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
            return Ok(Value::from(parsed));
        }
        if let Some(data) = &self.data {
            return Ok(Value::from(data.as_str()));
        }
        Ok(Value::Absent)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub socket: SocketArgs,
    /// Interval between `ticks` events, in milliseconds.
    #[arg(long, default_value = "1000")]
    pub tick_ms: u64,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    #[command(flatten)]
    pub socket: SocketArgs,
    /// Channel name.
    pub channel: String,
    /// Command name.
    pub command: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Cancel the call after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Context announced to the hub.
    #[arg(long, default_value = "ipcmux-cli")]
    pub ctx: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub socket: SocketArgs,
    /// Channel name.
    pub channel: String,
    /// Event name.
    pub event: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
    /// Exit after receiving N events.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub count: Option<u64>,
    /// Context announced to the hub.
    #[arg(long, default_value = "ipcmux-cli")]
    pub ctx: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub(crate) async fn shutdown_signal() -> CliResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())
            .map_err(|err| io_error("failed to install SIGTERM handler", err))?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.map_err(|err| io_error("failed to wait for Ctrl-C", err)),
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|err| io_error("failed to wait for Ctrl-C", err))
    }
}

#[cfg(not(unix))]
pub(crate) fn unsupported(command: &str) -> CliError {
    CliError::new(
        USAGE,
        format!("{command} requires Unix domain socket support on this platform"),
    )
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}
