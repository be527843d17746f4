//! Variable scopes for rendering and script execution.
//!
//! A [`Context`] is a mapping from names to JSON-like values plus an optional
//! borrowed parent. Loops and includes create child scopes with
//! [`Context::child`]; lookups fall through to the parent, and a child can
//! never write into an ancestor.

use crate::ast::VarPath;
use crate::error::{MargaritaError, Result};
use serde_json::{Map, Value};
use std::path::Path;

/// One scope in a chain of variable scopes.
#[derive(Debug, Clone, Default)]
pub struct Context<'p> {
    vars: Map<String, Value>,
    parent: Option<&'p Context<'p>>,
}

impl Context<'static> {
    /// An empty root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// A root scope holding the given variables.
    pub fn from_map(vars: Map<String, Value>) -> Self {
        Self { vars, parent: None }
    }

    /// A root scope from a JSON object. Non-object values are rejected.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(vars) => Ok(Self::from_map(vars)),
            other => Err(MargaritaError::UserError(format!(
                "context must be a mapping, got {}",
                crate::eval::kind_name(Some(&other))
            ))),
        }
    }

    /// Load a root scope from a JSON or YAML file (chosen by extension;
    /// anything other than `.json` is read as YAML).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MargaritaError::UserError(format!(
                "failed to read context file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let value: Value = if is_json {
            serde_json::from_str(&content).map_err(|e| {
                MargaritaError::UserError(format!(
                    "failed to parse context file '{}': {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                MargaritaError::UserError(format!(
                    "failed to parse context file '{}': {}",
                    path.display(),
                    e
                ))
            })?
        };

        // An empty YAML document is an empty context.
        if value.is_null() {
            return Ok(Self::new());
        }
        Self::from_json(value)
    }
}

impl<'p> Context<'p> {
    /// A new empty scope whose lookups fall through to `self`.
    pub fn child(&'p self) -> Context<'p> {
        Context {
            vars: Map::new(),
            parent: Some(self),
        }
    }

    /// Bind a name in this scope (builder form).
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Bind a name in this scope, shadowing any binding in a parent.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Look up a top-level name, falling through to parent scopes.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(value) => Some(value),
            None => self.parent.and_then(|parent| parent.get(name)),
        }
    }

    /// Resolve a dotted path. A missing key at any level yields `None`.
    pub fn resolve(&self, path: &VarPath) -> Option<&Value> {
        let (root, rest) = path.segments().split_first()?;
        rest.iter()
            .try_fold(self.get(root)?, |value, segment| match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    /// Every binding visible from this scope, innermost winning.
    pub fn flatten(&self) -> Map<String, Value> {
        let mut merged = match self.parent {
            Some(parent) => parent.flatten(),
            None => Map::new(),
        };
        for (name, value) in &self.vars {
            merged.insert(name.clone(), value.clone());
        }
        merged
    }
}
