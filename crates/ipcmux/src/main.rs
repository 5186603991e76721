mod cmd;
mod demo;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ipcmux", version, about = "Multiplexed IPC channels CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_subcommand() {
        let cli = Cli::try_parse_from([
            "ipcmux",
            "call",
            "--socket",
            "/tmp/test.sock",
            "demo",
            "double",
            "--json",
            "21",
            "--timeout",
            "2s",
        ])
        .expect("call args should parse");

        let Command::Call(args) = cli.command else {
            panic!("expected call subcommand");
        };
        assert_eq!(args.channel, "demo");
        assert_eq!(args.command, "double");
        assert_eq!(args.payload.json.as_deref(), Some("21"));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "ipcmux",
            "call",
            "--socket",
            "/tmp/test.sock",
            "demo",
            "echo",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_listen_subcommand() {
        let cli = Cli::try_parse_from([
            "ipcmux",
            "listen",
            "-s",
            "/tmp/test.sock",
            "demo",
            "ticks",
            "--count",
            "3",
        ])
        .expect("listen args should parse");

        let Command::Listen(args) = cli.command else {
            panic!("expected listen subcommand");
        };
        assert_eq!(args.count, Some(3));
        assert_eq!(args.event, "ticks");
    }

    #[test]
    fn parses_serve_subcommand_with_global_format() {
        let cli = Cli::try_parse_from([
            "ipcmux",
            "serve",
            "--socket",
            "/tmp/test.sock",
            "--tick-ms",
            "50",
            "--format",
            "raw",
        ])
        .expect("serve args should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Raw)));
        let Command::Serve(args) = cli.command else {
            panic!("expected serve subcommand");
        };
        assert_eq!(args.tick_ms, 50);
    }

    #[test]
    fn call_requires_a_command_name() {
        let err = Cli::try_parse_from(["ipcmux", "call", "--socket", "/tmp/test.sock", "demo"])
            .expect_err("missing command should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
