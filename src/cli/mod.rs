mod check;
mod run;
mod serve;

use anyhow::{Result, bail};
use console::style;
use std::path::PathBuf;

use crate::core::terminal::{self, GuideSection, print_error};
use crate::logging::{self, LogTarget};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Service")
        .command("serve", "Start the webhook server and the Slack adapter")
        .print();

    GuideSection::new("Operations")
        .command("run", "Dispatch one chat command against a grid")
        .command("resolve", "Discover the Jenkins endpoint of a grid")
        .print();

    GuideSection::new("Diagnostics")
        .command("check-config", "Load and validate the configuration")
        .command("help", "Show this message")
        .print();

    GuideSection::new("Options")
        .text("--config, -c <path>   Config file (default: $GRIDBOT_CONFIG, then the user config dir)")
        .text("--verbose, -v         Debug logging (otherwise $GRIDBOT_LOG, default info)")
        .text("--room, -r <grid>     Grid room for `run`")
        .text("--host <host>         Listener host for `serve`")
        .text("--port <port>         Listener port for `serve`")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("gridbot").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub verbose: bool,
}

pub(crate) fn parse_serve_flags(args: &[String], start: usize) -> Result<ServeArgs> {
    let mut parsed = ServeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    parsed.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    let Ok(port) = args[i + 1].parse() else {
                        bail!("--port expects a number, got `{}`", args[i + 1]);
                    };
                    parsed.port = Some(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunArgs {
    pub room: Option<String>,
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub line: String,
}

/// Flags are read until the first other token; everything after that is the
/// command line, so `gridbot run -r prod build app -v` passes `-v` to `build`.
pub(crate) fn parse_run_args(args: &[String], start: usize) -> RunArgs {
    let mut parsed = RunArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--room" | "-r" => {
                if i + 1 < args.len() {
                    parsed.room = Some(args[i + 1].trim_start_matches('#').to_string());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
            }
            _ => break,
        }
    }

    parsed.line = args[i.min(args.len())..].join(" ");
    parsed
}

/// Flags shared by `resolve` and `check-config`, plus their positional words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ToolArgs {
    pub config: Option<PathBuf>,
    pub verbose: bool,
    pub positional: Vec<String>,
}

pub(crate) fn parse_tool_args(args: &[String], start: usize) -> ToolArgs {
    let mut parsed = ToolArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
                i += 1;
            }
            other => {
                parsed.positional.push(other.to_string());
                i += 1;
            }
        }
    }
    parsed
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "serve" => {
            let parsed = parse_serve_flags(&args, 2)?;
            logging::init(parsed.verbose, LogTarget::Stdout);
            serve::run_serve(parsed).await
        }
        "run" => {
            let parsed = parse_run_args(&args, 2);
            logging::init(parsed.verbose, LogTarget::Stderr);
            let Some(room) = parsed.room.clone() else {
                bail!("run needs a grid room: gridbot run --room <grid> <command>");
            };
            if parsed.line.is_empty() {
                bail!("run needs a command, e.g. gridbot run --room {room} jenkins_list");
            }
            run::run_command(parsed.config.as_deref(), &room, &parsed.line).await
        }
        "resolve" => {
            let parsed = parse_tool_args(&args, 2);
            logging::init(parsed.verbose, LogTarget::Stderr);
            let Some(grid) = parsed.positional.first() else {
                bail!("resolve needs a grid name: gridbot resolve <grid>");
            };
            run::run_resolve(parsed.config.as_deref(), grid).await
        }
        "check-config" => {
            let parsed = parse_tool_args(&args, 2);
            logging::init(parsed.verbose, LogTarget::Stderr);
            check::run_check(parsed.config.as_deref())
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_error(&format!("Unknown command: {other}"));
            print_help();
            Ok(())
        }
    }
}
