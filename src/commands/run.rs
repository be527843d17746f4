//! Implementation of the `margarita run` command.

use super::{load_context, load_template, template_dir};
use crate::cli::RunArgs;
use anyhow::Context as _;
use chrono::Utc;
use margarita::agent::{AgentChannel, SubprocessChannel, drive};
use margarita::config::Config;
use margarita::error::MargaritaError;
use margarita::events::append_events;
use margarita::exec::{ExecutionModel, ExecutionState, FunctionRegistry, Resume, RunRequest};
use margarita::render::Renderer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Execute the `margarita run` command.
///
/// Runs the script to completion, answering each `@effect run` with the
/// configured agent, then prints the final output buffer. Events and state
/// are written even when the script fails, so a failed session can be
/// inspected or resumed.
pub fn cmd_run(config: &Config, args: RunArgs) -> anyhow::Result<()> {
    let template = load_template(&args.script)
        .with_context(|| format!("cannot run '{}'", args.script.display()))?;
    if !template.is_script() {
        debug!(script = %args.script.display(), "no script directives; output is plain prose");
    }
    let ctx = load_context(args.context.as_deref())?;

    let mut agent = config.agent.clone();
    if let Some(command) = &args.agent_command {
        agent.command = command.clone();
    }
    if let Some(timeout) = args.timeout {
        agent.timeout_seconds = timeout;
    }

    // Host functions come from embedding applications; the CLI has none.
    let mut model = ExecutionModel::new(Arc::new(template), Arc::new(FunctionRegistry::new()))
        .with_context(&ctx)
        .with_base_dir(template_dir(&args.script))
        .with_renderer(Renderer::new(config.render_options()))
        .with_last_result_variable(config.last_result_variable.clone());
    if let Some(path) = &args.state {
        model = model.with_state(ExecutionState::load(path)?);
    }

    let result = if agent.is_configured() {
        let session_dir = args.session_dir.clone().unwrap_or_else(default_session_dir);
        info!(session_dir = %session_dir.display(), "running script with agent");
        let mut channel = SubprocessChannel::new(agent, session_dir);
        drive(&mut model, &mut channel)
    } else {
        drive(&mut model, &mut NoAgent)
    };

    if let Some(path) = &args.events {
        append_events(path, model.events())?;
    }
    if let Some(path) = &args.save_state {
        model.state().save(path)?;
    }

    let state = result
        .map_err(MargaritaError::from)
        .with_context(|| format!("script '{}' failed", args.script.display()))?;
    print!("{}", state.buffer_text());
    Ok(())
}

/// Fails every run: used when no agent command is configured.
struct NoAgent;

impl AgentChannel for NoAgent {
    fn run(&mut self, _request: &RunRequest) -> Resume {
        Resume::Failed(
            "no agent configured (set agent.command in margarita.yaml or pass --agent-command)"
                .to_string(),
        )
    }
}

fn default_session_dir() -> PathBuf {
    std::env::temp_dir().join(format!(
        "margarita-{}-{}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        std::process::id()
    ))
}
