use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    build_target: &'static str,
    target_os: &'static str,
    target_arch: &'static str,
    unix_sockets: bool,
}

impl BuildInfo {
    fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            build_target: option_env!("IPCMUX_BUILD_TARGET").unwrap_or("unknown"),
            target_os: std::env::consts::OS,
            target_arch: std::env::consts::ARCH,
            unix_sockets: cfg!(unix),
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = BuildInfo::current();
    if !args.extended {
        println!("{} {}", info.name, info.version);
        return Ok(SUCCESS);
    }

    match format {
        OutputFormat::Json => print_json(&info),
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("{:<14}{}", "version", info.version);
            println!("{:<14}{}", "build target", info.build_target);
            println!("{:<14}{}/{}", "platform", info.target_os, info.target_arch);
            println!("{:<14}{}", "unix sockets", info.unix_sockets);
        }
    }
    Ok(SUCCESS)
}
