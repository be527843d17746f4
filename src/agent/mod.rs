//! Answering `@effect run` suspensions.
//!
//! The execution model never talks to an agent itself. A host drives it with
//! an [`AgentChannel`]: every time the model suspends, the channel receives
//! the [`RunRequest`] and returns how the run ended.
//!
//! - **Config**: the `agent` section of `margarita.yaml`
//! - **Command**: `{placeholder}` expansion for agent command lines
//! - **Subprocess**: a channel that runs the configured command per turn

mod command;
mod config;
mod subprocess;

pub use command::{CommandTemplateError, expand_command};
pub use config::{AgentConfig, DEFAULT_TIMEOUT_SECONDS};
pub use subprocess::{AgentOutput, SubprocessChannel};

use crate::error::EffectError;
use crate::exec::{ExecutionModel, ExecutionState, Resume, RunRequest, StepOutcome};
use tracing::info;

/// Something that can answer a run.
pub trait AgentChannel {
    fn run(&mut self, request: &RunRequest) -> Resume;
}

impl<F> AgentChannel for F
where
    F: FnMut(&RunRequest) -> Resume,
{
    fn run(&mut self, request: &RunRequest) -> Resume {
        self(request)
    }
}

/// Step `model` to the end, answering each suspension with `channel`.
pub fn drive(
    model: &mut ExecutionModel,
    channel: &mut dyn AgentChannel,
) -> Result<ExecutionState, EffectError> {
    let mut resume = None;
    loop {
        match model.step(resume.take()) {
            StepOutcome::Suspended(request) => {
                info!(turn = request.turn, "waiting for agent");
                resume = Some(channel.run(&request));
            }
            StepOutcome::Completed(state) => return Ok(state),
            StepOutcome::Failed(err) => return Err(err),
        }
    }
}
