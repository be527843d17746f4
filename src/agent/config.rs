//! The `agent` section of `margarita.yaml`.
//!
//! ```yaml
//! agent:
//!   command: "my-agent --prompt {prompt_file} --tools {tools}"
//!   timeout_seconds: 300
//!   environment:
//!     AGENT_MODE: "batch"
//! ```
//!
//! # Placeholders
//!
//! - `{prompt_file}` - Absolute path to the file holding the run's prompt
//! - `{turn}` - Turn number of the run, starting at 0
//! - `{tools}` - Registered tool names, comma-separated

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default timeout for one agent run in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// How to invoke the external agent for `@effect run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Command template. Empty means no agent is configured.
    pub command: String,

    pub timeout_seconds: u64,

    /// Extra environment variables for the agent process.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            environment: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.command.trim().is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
