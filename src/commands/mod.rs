//! Command implementations for margarita.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations, plus the file loading they share.

mod metadata;
mod render;
mod run;

use crate::cli::Command;
use anyhow::Context as _;
use margarita::ast::Template;
use margarita::config::{CONFIG_FILE_NAME, Config};
use margarita::context::Context;
use margarita::error::{MargaritaError, Result};
use margarita::parser::parse;
use std::path::Path;

/// Dispatch a command to its implementation.
pub fn dispatch(config_path: Option<&Path>, command: Command) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    match command {
        Command::Render(args) => render::cmd_render(&config, args),
        Command::Metadata(args) => metadata::cmd_metadata(args),
        Command::Run(args) => run::cmd_run(&config, args),
    }
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(CONFIG_FILE_NAME),
    };
    config.context("failed to load configuration")
}

/// Read and parse a template file.
pub(crate) fn load_template(path: &Path) -> Result<Template> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        MargaritaError::UserError(format!(
            "failed to read template '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(parse(&source)?)
}

/// Load a context file, or an empty context when none is given.
pub(crate) fn load_context(path: Option<&Path>) -> Result<Context<'static>> {
    match path {
        Some(path) => Context::load(path),
        None => Ok(Context::new()),
    }
}

/// Directory containing `path`, for resolving its includes.
pub(crate) fn template_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}
