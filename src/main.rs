//! Margarita: template and script engine for prompts and agent sessions.
//!
//! This is the main entry point for the `margarita` CLI. It parses arguments,
//! installs logging, dispatches to the appropriate command handler, and
//! handles errors with proper exit codes.

mod cli;
mod commands;

use cli::Cli;
use margarita::error::MargaritaError;
use margarita::exit_codes;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (e.g. `margarita=debug`).
const LOG_ENV: &str = "MARGARITA_LOG";

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match commands::dispatch(cli.config.as_deref(), cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {:#}", err);

            let code = err
                .downcast_ref::<MargaritaError>()
                .map_or(exit_codes::USER_ERROR, MargaritaError::exit_code);
            ExitCode::from(code as u8)
        }
    }
}
