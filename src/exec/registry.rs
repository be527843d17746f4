//! Host-provided callables.
//!
//! Scripts never reach host code directly. `from <module> import name` only
//! records intent; the name is resolved against a [`FunctionRegistry`] the
//! host injects into the execution model, at the point of first use.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A value-in, value-out host operation.
///
/// Calls are synchronous from the interpreter's point of view. A host that
/// wraps an asynchronous operation blocks inside `call` until it completes.
pub trait HostFunction: Send + Sync {
    fn call(&self, args: &[Value]) -> Result<Value, String>;
}

impl<F> HostFunction for F
where
    F: Fn(&[Value]) -> Result<Value, String> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> Result<Value, String> {
        self(args)
    }
}

/// Named host callables.
///
/// Entries may be registered under a bare name (`add`) or qualified by the
/// module scripts import them from (`math.add`). Qualified entries win.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn HostFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register_host(name, Arc::new(function))
    }

    /// Register any [`HostFunction`] implementation under `name`.
    pub fn register_host(
        &mut self,
        name: impl Into<String>,
        function: Arc<dyn HostFunction>,
    ) -> &mut Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HostFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `name` as imported from `module`: `module.name` first, then
    /// the bare `name`.
    pub fn lookup(&self, module: &str, name: &str) -> Option<Arc<dyn HostFunction>> {
        self.get(&format!("{}.{}", module, name))
            .or_else(|| self.get(name))
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
