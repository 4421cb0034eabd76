//! Purpose: `switchyard` CLI entry point.
//! Role: Binary crate root; parses args, runs commands, reports errors on stderr.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::io::{self, IsTerminal};

use clap::{Args, Parser, Subcommand, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;

mod command_dispatch;
mod demo;
mod serve;

use switchyard::api::{Error, ErrorKind, to_exit_code};

const DEFAULT_BIND: &str = "127.0.0.1:9800";
const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
const DEFAULT_MAX_CONNECTIONS: usize = 256;

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(exit_code);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `switchyard --help` for usage."));
            }
        },
    };

    command_dispatch::dispatch_command(cli.command)
}

#[derive(Parser)]
#[command(
    name = "switchyard",
    version,
    about = "Serve plugin resources over HTTP/JSON and WebSocket push",
    long_about = None,
    before_help = r#"Services own resources; resources own elements.

Mental model:
  - HTTP reads and mutates elements (GET/POST/DELETE /{service}/{resource}/{id})
  - WebSocket /ws subscribes to topics and receives data frames on change
"#,
    after_help = r#"EXAMPLES
  $ switchyard serve --demo --demo-tick-ms 1000
  $ curl http://127.0.0.1:9800/lights/bulbs/
  $ curl 'http://127.0.0.1:9800/lights/bulbs/550e8400-e29b-41d4-a716-446655440000?$fields=brightness'

  WebSocket (send on /ws):
    {"type":"subscribe","event":"/lights/bulbs/550e8400-e29b-41d4-a716-446655440000"}"#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(
        about = "Run the HTTP/WebSocket server",
        long_about = r#"Run the HTTP/WebSocket server for all registered services."#,
        after_help = r#"EXAMPLES
  $ switchyard serve --demo
  $ switchyard serve --demo --bind 0.0.0.0:9800 --allow-non-loopback
  $ switchyard serve --demo --cors-origin http://localhost:3000
  $ switchyard serve --demo check --json

NOTES
  - Loopback-only unless --allow-non-loopback is given
  - RUST_LOG overrides --log-level when set
  - Outbound push queues are unbounded; slow clients are not throttled"#
    )]
    Serve {
        #[command(flatten)]
        run: ServeRunArgs,
        #[command(subcommand)]
        command: Option<ServeSubcommand>,
    },
    #[command(
        arg_required_else_help = true,
        about = "Generate shell completion scripts",
        after_help = r#"EXAMPLES
  $ switchyard completion bash > ~/.local/share/bash-completion/completions/switchyard
  $ switchyard completion zsh > ~/.zfunc/_switchyard
  $ switchyard completion fish > ~/.config/fish/completions/switchyard.fish"#
    )]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ServeSubcommand {
    #[command(
        about = "Validate serve config and print effective settings without starting",
        after_help = r#"NOTES
  - Exits non-zero when config is invalid
  - Does not bind sockets or start background tasks"#
    )]
    Check {
        #[arg(long, help = "Emit JSON instead of human-readable output")]
        json: bool,
    },
}

#[derive(Args)]
struct ServeRunArgs {
    #[arg(long, default_value = DEFAULT_BIND, help = "Bind address", help_heading = "Connection")]
    bind: String,
    #[arg(
        long = "cors-origin",
        value_name = "ORIGIN",
        help = "Allow browser requests from this origin (repeatable, explicit list)",
        help_heading = "Connection"
    )]
    cors_origin: Vec<String>,
    #[arg(
        long,
        help = "Allow non-loopback binds (no authentication is performed)",
        help_heading = "Safety"
    )]
    allow_non_loopback: bool,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BODY_BYTES,
        help = "Max request body size in bytes",
        help_heading = "Safety"
    )]
    max_body_bytes: u64,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        help = "Max concurrent WebSocket connections",
        help_heading = "Safety"
    )]
    max_connections: usize,
    #[arg(long, help = "Register the built-in `lights` demo service", help_heading = "Services")]
    demo: bool,
    #[arg(
        long,
        value_name = "MS",
        help = "Change a demo bulb every MS milliseconds (requires --demo)",
        help_heading = "Services"
    )]
    demo_tick_ms: Option<u64>,
    #[arg(
        long,
        default_value = "info",
        help = "Log filter used when RUST_LOG is unset (e.g. debug, switchyard=trace)",
        help_heading = "Logging"
    )]
    log_level: String,
}

fn serve_config_from_run_args(run: ServeRunArgs) -> Result<serve::ServeConfig, Error> {
    let bind = run.bind.parse().map_err(|_| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid bind address")
            .with_hint("Use a host:port value like 127.0.0.1:9800.")
    })?;
    Ok(serve::ServeConfig {
        bind,
        allow_non_loopback: run.allow_non_loopback,
        cors_allowed_origins: run.cors_origin,
        max_body_bytes: run.max_body_bytes,
        max_connections: run.max_connections,
        demo: run.demo,
        demo_tick_ms: run.demo_tick_ms,
        log_level: run.log_level,
    })
}

fn emit_serve_check_report(config: &serve::ServeConfig, json: bool) {
    let base_url = format!("http://{}", config.bind);
    let cors = if config.cors_allowed_origins.is_empty() {
        "same-origin"
    } else {
        "allowlist"
    };
    if json {
        let report = json!({
            "ok": true,
            "bind": config.bind.to_string(),
            "base_url": base_url,
            "websocket_url": format!("ws://{}/ws", config.bind),
            "cors_allowed_origins": config.cors_allowed_origins,
            "max_body_bytes": config.max_body_bytes,
            "max_connections": config.max_connections,
            "demo": config.demo,
            "demo_tick_ms": config.demo_tick_ms,
        });
        println!("{report}");
        return;
    }
    println!("Config OK");
    println!("  HTTP: {base_url}/");
    println!("  Push: ws://{}/ws", config.bind);
    println!("  CORS: {cors}    Max connections: {}", config.max_connections);
    println!(
        "  Demo: {}",
        match (config.demo, config.demo_tick_ms) {
            (true, Some(ms)) => format!("on (tick every {ms} ms)"),
            (true, None) => "on".to_string(),
            (false, _) => "off".to_string(),
        }
    );
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.trim_start_matches("error: ").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        return;
    }

    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::NotImplemented => "not implemented".to_string(),
        ErrorKind::Failed => "operation failed".to_string(),
        ErrorKind::AlreadyExists => "already exists".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

#[cfg(test)]
mod tests {
    use super::{Cli, error_json};
    use clap::CommandFactory;
    use serde_json::json;
    use switchyard::api::{Error, ErrorKind};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn error_json_includes_hint_and_causes() {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to bind server")
            .with_hint("Pick another port.")
            .with_source(std::io::Error::other("address in use"));
        assert_eq!(
            error_json(&err),
            json!({
                "error": {
                    "kind": "Io",
                    "message": "failed to bind server",
                    "hint": "Pick another port.",
                    "causes": ["address in use"],
                }
            })
        );
    }
}
