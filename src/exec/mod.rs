//! Agent-script execution.
//!
//! - [`ExecutionModel`] interprets a script segment by segment
//! - [`ExecutionState`] is the persistent state it owns
//! - [`FunctionRegistry`] holds the host callables scripts import

pub mod model;
pub mod registry;
pub mod state;

pub use model::{
    AgentResponse, DEFAULT_LAST_RESULT_VARIABLE, ExecutionModel, Progress, Resume, RunRequest,
    Status, StepOutcome,
};
pub use registry::{FunctionRegistry, HostFunction};
pub use state::{ExecutionState, ToolCall};

#[cfg(test)]
mod tests;
