use std::io::{IsTerminal, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use ipcmux_wire::Value;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ServingOutput<'a> {
    event: &'static str,
    socket: &'a str,
    pid: u32,
}

#[derive(Serialize)]
struct CallOutput<'a> {
    channel: &'a str,
    command: &'a str,
    kind: &'static str,
    result: serde_json::Value,
}

#[derive(Serialize)]
struct EventOutput<'a> {
    channel: &'a str,
    event: &'a str,
    seq: u64,
    kind: &'static str,
    data: serde_json::Value,
    timestamp: String,
}

pub fn print_serving(socket: &Path, format: OutputFormat) {
    let socket = socket.display().to_string();
    match format {
        OutputFormat::Json => print_json(&ServingOutput {
            event: "listening",
            socket: &socket,
            pid: std::process::id(),
        }),
        OutputFormat::Pretty | OutputFormat::Raw => println!("listening on {socket}"),
    }
}

pub fn print_call_result(channel: &str, command: &str, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&CallOutput {
            channel,
            command,
            kind: value.kind(),
            result: value.to_json(),
        }),
        OutputFormat::Pretty => {
            println!("{channel}.{command} -> {}", pretty_value(value));
        }
        OutputFormat::Raw => print_raw(value),
    }
}

pub fn print_event(channel: &str, event: &str, seq: u64, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EventOutput {
            channel,
            event,
            seq,
            kind: value.kind(),
            data: value.to_json(),
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Pretty => {
            println!("{channel}.{event} #{seq} {}", pretty_value(value));
        }
        OutputFormat::Raw => print_raw(value),
    }
}

/// Strings and bytes are written as-is; everything else as compact JSON.
pub fn print_raw(value: &Value) {
    let mut out = std::io::stdout();
    let _ = match value {
        Value::Bytes(bytes) => out.write_all(bytes),
        Value::String(text) => writeln!(out, "{text}"),
        Value::Absent => Ok(()),
        other => writeln!(out, "{}", other.to_json()),
    };
    let _ = out.flush();
}

pub(crate) fn print_json<T: Serialize>(out: &T) {
    println!(
        "{}",
        serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
    );
}

fn pretty_value(value: &Value) -> String {
    match value {
        Value::Absent => "(absent)".to_string(),
        Value::Bytes(bytes) => format!("<binary {} bytes>", bytes.len()),
        other => serde_json::to_string_pretty(&other.to_json())
            .unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
