//! Persistent execution state.

use crate::error::{MargaritaError, Result};
use crate::fs::atomic_write_file;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// A tool invocation made by the agent while the script was suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub result: Value,
}

/// Everything one script session carries across agent turns.
///
/// Owned by exactly one [`ExecutionModel`](super::ExecutionModel). A host
/// that wants to resume a session later saves it and seeds a new model with
/// [`ExecutionModel::with_state`](super::ExecutionModel::with_state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionState {
    /// Persistent variable store. Survives context and tool clears.
    pub variables: Map<String, Value>,

    /// Tools offered to the agent on the next run, in registration order.
    pub tools: Vec<String>,

    /// Output buffer: the text fragments the agent sees.
    pub buffer: Vec<String>,

    /// Completed agent turns.
    pub turn: u32,

    /// Tool calls made during the current suspension.
    pub pending_tool_calls: Vec<ToolCall>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool to the registered set. Returns `false` if it was already
    /// registered.
    pub fn register_tool(&mut self, name: &str) -> bool {
        if self.has_tool(name) {
            return false;
        }
        self.tools.push(name.to_string());
        true
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t == name)
    }

    /// The buffer as one string, fragments concatenated in order.
    pub fn buffer_text(&self) -> String {
        self.buffer.concat()
    }

    /// Load a state saved with [`ExecutionState::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to read state file '{}': {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to parse state file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Save as pretty-printed JSON, atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self).map_err(|e| {
            MargaritaError::UserError(format!("failed to serialize state: {}", e))
        })?;
        content.push('\n');
        atomic_write_file(path, &content)
    }
}
