//! Purpose: Hold top-level CLI command dispatch for `switchyard`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Returns the process exit code on success; errors are reported by `main`.

use std::io;

use clap::CommandFactory;

use super::{
    Cli, Command, ServeSubcommand, emit_serve_check_report, serve, serve_config_from_run_args,
};
use switchyard::api::{Error, ErrorKind};

pub(super) fn dispatch_command(command: Command) -> Result<i32, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "switchyard", &mut io::stdout());
            Ok(0)
        }
        Command::Serve { run, command } => match command {
            Some(ServeSubcommand::Check { json }) => {
                let config = serve_config_from_run_args(run)?;
                serve::validate_config(&config)?;
                emit_serve_check_report(&config, json);
                Ok(0)
            }
            None => {
                let config = serve_config_from_run_args(run)?;
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .map_err(|err| {
                        Error::new(ErrorKind::Internal)
                            .with_message("failed to start runtime")
                            .with_source(err)
                    })?;
                runtime.block_on(serve::serve(config))?;
                Ok(0)
            }
        },
    }
}
