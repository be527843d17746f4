//! Config struct definition and default implementation.

use crate::agent::AgentConfig;
use crate::exec::DEFAULT_LAST_RESULT_VARIABLE;
use crate::render::DEFAULT_EXTENSION;
use serde::{Deserialize, Serialize};

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "margarita.yaml";

/// Configuration for rendering and running templates.
///
/// This struct represents the contents of `margarita.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Rendering
    // =========================================================================
    /// Fail when a template interpolates a variable that is not defined.
    pub strict_variables: bool,

    /// Extension added to include paths that have none (no leading dot).
    #[serde(default = "default_extension")]
    pub default_extension: String,

    // =========================================================================
    // Scripts
    // =========================================================================
    /// Persistent variable that receives each agent response.
    #[serde(default = "default_last_result_variable")]
    pub last_result_variable: String,

    /// How `@effect run` reaches the agent.
    pub agent: AgentConfig,
}

fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_last_result_variable() -> String {
    DEFAULT_LAST_RESULT_VARIABLE.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_variables: false,
            default_extension: default_extension(),
            last_result_variable: default_last_result_variable(),
            agent: AgentConfig::default(),
        }
    }
}
