//! Config loading, validation, and conversion into engine options.

use super::model::Config;
use crate::ast::is_identifier;
use crate::error::{MargaritaError, Result};
use crate::render::RenderOptions;
use std::path::Path;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load config from `path` if the file exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document is a valid, all-defaults config.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml).map_err(|e| {
            MargaritaError::UserError(format!("failed to parse config YAML: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            MargaritaError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `default_extension` must be non-empty and have no leading dot
    /// - `last_result_variable` must be a valid identifier
    /// - `agent.timeout_seconds` must be positive
    pub fn validate(&self) -> Result<()> {
        if self.default_extension.is_empty() {
            return Err(MargaritaError::UserError(
                "config validation failed: default_extension must be non-empty".to_string(),
            ));
        }
        if self.default_extension.starts_with('.') {
            return Err(MargaritaError::UserError(format!(
                "config validation failed: default_extension must not have a leading dot (found '{}'). Use '{}' instead.",
                self.default_extension,
                self.default_extension.trim_start_matches('.')
            )));
        }

        if !is_identifier(&self.last_result_variable) {
            return Err(MargaritaError::UserError(format!(
                "config validation failed: last_result_variable '{}' is not a valid variable name",
                self.last_result_variable
            )));
        }

        if self.agent.timeout_seconds == 0 {
            return Err(MargaritaError::UserError(
                "config validation failed: agent.timeout_seconds must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Rendering options derived from this config.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            strict_variables: self.strict_variables,
            default_extension: self.default_extension.clone(),
        }
    }
}
