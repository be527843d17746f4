//! Rendering a template AST to text.
//!
//! The walk is depth-first and left to right. Output is accumulated in a
//! private buffer and only returned when the whole walk succeeds, so a
//! failing render never yields partial text.

use crate::ast::{Node, Template};
use crate::context::Context;
use crate::error::{EvalError, RenderError};
use crate::eval::{evaluate_condition, evaluate_iterable, stringify};
use crate::include::{IncludeResolver, TemplateCache};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension appended to include paths that have none.
pub const DEFAULT_EXTENSION: &str = "mg";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Fail on interpolation of an absent variable instead of emitting "".
    pub strict_variables: bool,
    /// Extension added to include paths without one. Empty disables it.
    pub default_extension: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            strict_variables: false,
            default_extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

/// Renders templates, sharing one [`TemplateCache`] across every render it
/// performs.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    cache: Arc<TemplateCache>,
    options: RenderOptions,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            cache: Arc::new(TemplateCache::new()),
            options,
        }
    }

    /// A renderer that shares an existing cache.
    pub fn with_cache(cache: Arc<TemplateCache>, options: RenderOptions) -> Self {
        Self { cache, options }
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Render `ast` against `ctx`. Top-level includes resolve against
    /// `base_dir`.
    pub fn render(
        &self,
        ast: &[Node],
        ctx: &Context<'_>,
        base_dir: &Path,
    ) -> Result<String, RenderError> {
        self.render_in_chain(ast, ctx, base_dir, &mut Vec::new())
    }

    /// Parse (through the cache) and render the template file at `path`.
    ///
    /// The file itself is the first entry of the include chain, so a file
    /// that includes itself is reported as a cycle.
    pub fn render_file(&self, path: &Path, ctx: &Context<'_>) -> Result<String, RenderError> {
        let path = path
            .canonicalize()
            .map_err(|_| RenderError::IncludeNotFound {
                path: path.to_path_buf(),
            })?;
        let template = self.cache.load(&path)?;
        let dir = path.parent().unwrap_or(Path::new("")).to_path_buf();
        self.render_in_chain(&template.ast, ctx, &dir, &mut vec![path])
    }

    /// Render a template as it would appear inside a file located in `dir`,
    /// with `chain` already in progress.
    pub(crate) fn render_in_chain(
        &self,
        ast: &[Node],
        ctx: &Context<'_>,
        dir: &Path,
        chain: &mut Vec<PathBuf>,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render_nodes(ast, ctx, dir, chain, &mut out)?;
        Ok(out)
    }

    fn resolver(&self) -> IncludeResolver<'_> {
        IncludeResolver::new(&self.cache, &self.options.default_extension)
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        ctx: &Context<'_>,
        dir: &Path,
        chain: &mut Vec<PathBuf>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        for node in nodes {
            self.render_node(node, ctx, dir, chain, out)?;
        }
        Ok(())
    }

    fn render_node(
        &self,
        node: &Node,
        ctx: &Context<'_>,
        dir: &Path,
        chain: &mut Vec<PathBuf>,
        out: &mut String,
    ) -> Result<(), RenderError> {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Interpolation(path) => {
                let value = ctx.resolve(path);
                if value.is_none() && self.options.strict_variables {
                    return Err(EvalError::Absent(path.to_string()).into());
                }
                out.push_str(&stringify(value));
            }
            Node::Block(body) => self.render_nodes(body, ctx, dir, chain, out)?,
            Node::Conditional {
                branches,
                else_body,
            } => {
                for branch in branches {
                    if evaluate_condition(&branch.condition, ctx)? {
                        return self.render_nodes(&branch.body, ctx, dir, chain, out);
                    }
                }
                if let Some(body) = else_body {
                    self.render_nodes(body, ctx, dir, chain, out)?;
                }
            }
            Node::Loop {
                var,
                iterable,
                body,
            } => {
                for item in evaluate_iterable(iterable, ctx)? {
                    let scope = ctx.child().with(var.clone(), item);
                    self.render_nodes(body, &scope, dir, chain, out)?;
                }
            }
            Node::Include(include) => {
                let resolved = self.resolver().resolve(include, ctx, dir, chain)?;
                let mut scope = ctx.child();
                for (name, value) in resolved.bindings.iter() {
                    scope.set(name.clone(), value.clone());
                }
                chain.push(resolved.path.clone());
                let result =
                    self.render_nodes(&resolved.template.ast, &scope, resolved.dir(), chain, out);
                chain.pop();
                result?;
            }
            Node::FunctionImport { .. } | Node::Effect(_) | Node::StateAssign { .. } => {
                tracing::debug!(?node, "script directive has no effect when rendering");
            }
        }
        Ok(())
    }
}

/// Render `ast` with default options and a fresh cache.
pub fn render(ast: &[Node], ctx: &Context<'_>, base_dir: &Path) -> Result<String, RenderError> {
    Renderer::default().render(ast, ctx, base_dir)
}

/// Render a parsed template with default options and a fresh cache.
pub fn render_template(
    template: &Template,
    ctx: &Context<'_>,
    base_dir: &Path,
) -> Result<String, RenderError> {
    render(&template.ast, ctx, base_dir)
}

#[cfg(test)]
mod tests;
