//! CLI argument parsing for margarita.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Margarita: render prompt templates and run multi-turn agent scripts.
///
/// Templates are `.mg` files of `<<prose>>` blocks, `${variable}`
/// interpolation, `if`/`for` control flow and `[[ include ]]` markers.
/// Scripts add `@state` and `@effect` directives and suspend at
/// `@effect run` to hand the accumulated prompt to an agent.
#[derive(Parser, Debug)]
#[command(name = "margarita")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ./margarita.yaml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for margarita.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render a template to text.
    ///
    /// Includes are resolved relative to the template's directory unless
    /// --base-dir is given.
    Render(RenderArgs),

    /// Print a template's metadata header.
    Metadata(MetadataArgs),

    /// Run an agent script to completion.
    ///
    /// Each `@effect run` invokes the agent command configured in
    /// margarita.yaml (or --agent-command) and feeds its stdout back in.
    Run(RunArgs),
}

/// Arguments for the `render` command.
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Template file to render.
    pub template: PathBuf,

    /// JSON or YAML file with the variables to render with.
    #[arg(short, long)]
    pub context: Option<PathBuf>,

    /// Directory that top-level includes resolve against.
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Fail on undefined variables instead of rendering them empty.
    #[arg(long)]
    pub strict: bool,

    /// Write the output to a file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the `metadata` command.
#[derive(Parser, Debug)]
pub struct MetadataArgs {
    /// Template file to read.
    pub template: PathBuf,

    /// Print as a JSON object instead of `key: value` lines.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `run` command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Script file to run.
    pub script: PathBuf,

    /// JSON or YAML file with read-only variables for the script.
    #[arg(short, long)]
    pub context: Option<PathBuf>,

    /// Resume from a state file saved by an earlier run.
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Save the final state to this file.
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Append session events (NDJSON) to this file.
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Directory for prompts and agent output (default: a temporary directory).
    #[arg(long)]
    pub session_dir: Option<PathBuf>,

    /// Agent command template, overriding the config.
    #[arg(long)]
    pub agent_command: Option<String>,

    /// Agent timeout in seconds, overriding the config.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_render_args() {
        let cli = Cli::try_parse_from([
            "margarita",
            "render",
            "page.mg",
            "--context",
            "ctx.yaml",
            "--strict",
            "--config",
            "custom.yaml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Command::Render(args) => {
                assert_eq!(args.template, PathBuf::from("page.mg"));
                assert_eq!(args.context, Some(PathBuf::from("ctx.yaml")));
                assert!(args.strict);
                assert!(args.output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parse_run_args() {
        let cli = Cli::try_parse_from([
            "margarita",
            "run",
            "chat.mg",
            "--agent-command",
            "cat {prompt_file}",
            "--timeout",
            "5",
            "--save-state",
            "state.json",
        ])
        .unwrap();

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.agent_command.as_deref(), Some("cat {prompt_file}"));
                assert_eq!(args.timeout, Some(5));
                assert_eq!(args.save_state, Some(PathBuf::from("state.json")));
                assert!(args.state.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn run_rejects_zero_timeout() {
        let result = Cli::try_parse_from(["margarita", "run", "chat.mg", "--timeout", "0"]);
        assert!(result.is_err());

        let cli = Cli::try_parse_from(["margarita", "run", "chat.mg", "--timeout", "1"]).unwrap();
        match cli.command {
            Command::Run(args) => assert_eq!(args.timeout, Some(1)),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn metadata_requires_a_template() {
        assert!(Cli::try_parse_from(["margarita", "metadata"]).is_err());
    }
}
