//! Answering runs with an external agent process.
//!
//! For each run the prompt is written to `turn-{turn}.prompt.md` in the
//! session directory, the configured command is expanded and spawned, and
//! whatever the process prints on stdout becomes the response. Stdout and
//! stderr go to files next to the prompt so a long response cannot block the
//! process on a full pipe.

use super::AgentChannel;
use super::command::expand_command;
use super::config::AgentConfig;
use crate::error::{MargaritaError, Result};
use crate::exec::{AgentResponse, Resume, RunRequest};
use crate::fs::atomic_write_file;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Files and outcome of one agent process.
#[derive(Debug, Clone)]
pub struct AgentOutput {
    /// Exit code (None if killed or terminated by a signal).
    pub exit_code: Option<i32>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub duration: Duration,
    pub timed_out: bool,
    /// The expanded command line.
    pub command: String,
}

impl AgentOutput {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// An [`AgentChannel`] that runs a configured command per turn.
#[derive(Debug, Clone)]
pub struct SubprocessChannel {
    config: AgentConfig,
    session_dir: PathBuf,
}

impl SubprocessChannel {
    /// Prompts and agent output are kept under `session_dir`.
    pub fn new(config: AgentConfig, session_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            session_dir: session_dir.into(),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Write the prompt, run the agent and wait for it.
    pub fn execute(&self, request: &RunRequest) -> Result<AgentOutput> {
        let prompt_path = self
            .session_dir
            .join(format!("turn-{}.prompt.md", request.turn));
        atomic_write_file(&prompt_path, &request.prompt())?;
        let prompt_path = prompt_path.canonicalize().map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to resolve prompt file '{}': {}",
                prompt_path.display(),
                e
            ))
        })?;

        let values = HashMap::from([
            ("prompt_file", prompt_path.display().to_string()),
            ("turn", request.turn.to_string()),
            ("tools", request.tools.join(",")),
        ]);
        let command_line = expand_command(&self.config.command, &values).map_err(|e| {
            MargaritaError::UserError(format!(
                "invalid agent command '{}': {}\n\
                 Available placeholders: prompt_file, tools, turn",
                self.config.command, e
            ))
        })?;

        let args = shell_words::split(&command_line).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to parse agent command '{}': {}\n\
                 Fix: check for unmatched quotes or invalid escape sequences.",
                command_line, e
            ))
        })?;
        let Some((program, program_args)) = args.split_first() else {
            return Err(MargaritaError::UserError(format!(
                "agent command is empty after parsing: '{}'",
                command_line
            )));
        };

        let stdout_path = self
            .session_dir
            .join(format!("turn-{}.stdout.log", request.turn));
        let stderr_path = self
            .session_dir
            .join(format!("turn-{}.stderr.log", request.turn));
        let stdout_file = create_log(&stdout_path)?;
        let stderr_file = create_log(&stderr_path)?;

        let mut command = Command::new(program);
        command
            .args(program_args)
            .current_dir(&self.session_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));
        for (key, value) in &self.config.environment {
            command.env(key, value);
        }

        debug!(command = %command_line, turn = request.turn, "spawning agent");
        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to execute agent command '{}': {}\n\
                 Fix: ensure the command is installed and in PATH.",
                program, e
            ))
        })?;

        let (exit_code, timed_out) = wait_with_timeout(&mut child, self.config.timeout())?;
        if timed_out {
            warn!(
                command = %command_line,
                timeout_seconds = self.config.timeout_seconds,
                "agent timed out and was killed"
            );
        }

        Ok(AgentOutput {
            exit_code,
            stdout_path,
            stderr_path,
            duration: started.elapsed(),
            timed_out,
            command: command_line,
        })
    }

    fn respond(&self, request: &RunRequest) -> Result<Resume> {
        let output = self.execute(request)?;
        if output.timed_out {
            return Ok(Resume::Failed(format!(
                "agent timed out after {} seconds",
                self.config.timeout_seconds
            )));
        }
        if !output.is_success() {
            return Ok(Resume::Failed(format!(
                "agent exited with {} (see {})",
                output
                    .exit_code
                    .map_or_else(|| "a signal".to_string(), |code| format!("code {}", code)),
                output.stderr_path.display()
            )));
        }

        let text = std::fs::read_to_string(&output.stdout_path).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to read agent output '{}': {}",
                output.stdout_path.display(),
                e
            ))
        })?;
        Ok(Resume::Response(AgentResponse::new(text)))
    }
}

impl AgentChannel for SubprocessChannel {
    fn run(&mut self, request: &RunRequest) -> Resume {
        self.respond(request)
            .unwrap_or_else(|e| Resume::Failed(e.to_string()))
    }
}

fn create_log(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| {
        MargaritaError::UserError(format!(
            "failed to create agent log '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Poll `child` until it exits or `timeout` passes. Returns
/// `(exit_code, timed_out)`.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<(Option<i32>, bool)> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(50);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok((status.code(), false)),
            Ok(None) if start.elapsed() >= timeout => {
                // SIGKILL on Unix, TerminateProcess on Windows.
                let _ = child.kill();
                let _ = child.wait();
                return Ok((None, true));
            }
            Ok(None) => std::thread::sleep(poll_interval),
            Err(e) => {
                return Err(MargaritaError::UserError(format!(
                    "failed to check agent process status: {}",
                    e
                )));
            }
        }
    }
}
