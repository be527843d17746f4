//! Include resolution and the parsed-template cache.
//!
//! Include paths are resolved relative to the directory of the template that
//! contains the include. Resolution threads an explicit chain of the absolute
//! paths currently being expanded; meeting one of them again is a cycle.

use crate::ast::{Include, IncludePath, Template};
use crate::context::Context;
use crate::error::{EvalError, RenderError};
use crate::eval::{evaluate, stringify};
use crate::parser;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Parsed templates keyed by canonical path.
///
/// Entries are immutable once inserted, so one cache can be shared by
/// concurrent renders (wrap it in an [`Arc`]). The cache lives as long as
/// its owner keeps it; nothing is global.
#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<PathBuf, Arc<Template>>>,
    parses: AtomicUsize,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached template for `path`, reading and parsing it on the
    /// first request. `path` should already be canonical.
    pub fn load(&self, path: &Path) -> Result<Arc<Template>, RenderError> {
        if let Some(template) = self.get(path) {
            tracing::debug!(path = %path.display(), "template cache hit");
            return Ok(template);
        }

        let source = std::fs::read_to_string(path).map_err(|e| RenderError::IncludeRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let template = parser::parse(&source).map_err(|source| RenderError::IncludeParse {
            path: path.to_path_buf(),
            source,
        })?;
        self.parses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), "parsed template into cache");

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // A concurrent render may have won the race; keep the first entry.
        let entry = entries
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(template));
        Ok(Arc::clone(entry))
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Template>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Number of cached templates.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times a template file has been parsed by this cache.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// An include ready to be rendered.
#[derive(Debug, Clone)]
pub struct ResolvedInclude {
    /// Canonical path of the included template.
    pub path: PathBuf,
    pub template: Arc<Template>,
    /// Binding values, evaluated in the including scope.
    pub bindings: Map<String, Value>,
}

impl ResolvedInclude {
    /// Directory that the included template's own includes resolve against.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new(""))
    }
}

/// Resolves include markers against the filesystem and a [`TemplateCache`].
#[derive(Debug, Clone, Copy)]
pub struct IncludeResolver<'r> {
    cache: &'r TemplateCache,
    default_extension: &'r str,
}

impl<'r> IncludeResolver<'r> {
    pub fn new(cache: &'r TemplateCache, default_extension: &'r str) -> Self {
        Self {
            cache,
            default_extension,
        }
    }

    /// Resolve `include` as seen from a template in `dir`.
    ///
    /// `chain` holds the canonical paths currently being expanded, outermost
    /// first. If the target is already among them the result is
    /// [`RenderError::IncludeCycle`] carrying the whole chain plus the repeat.
    pub fn resolve(
        &self,
        include: &Include,
        ctx: &Context<'_>,
        dir: &Path,
        chain: &[PathBuf],
    ) -> Result<ResolvedInclude, RenderError> {
        let path = self.locate(&include.path, ctx, dir)?;

        if chain.contains(&path) {
            let mut cycle = chain.to_vec();
            cycle.push(path);
            return Err(RenderError::IncludeCycle { chain: cycle });
        }

        let mut bindings = Map::new();
        for (name, expr) in &include.bindings {
            let value = evaluate(expr, ctx)?.unwrap_or(Value::Null);
            bindings.insert(name.clone(), value);
        }

        let template = self.cache.load(&path)?;
        Ok(ResolvedInclude {
            path,
            template,
            bindings,
        })
    }

    /// Turn an include target into a canonical file path.
    pub fn locate(
        &self,
        target: &IncludePath,
        ctx: &Context<'_>,
        dir: &Path,
    ) -> Result<PathBuf, RenderError> {
        let relative = match target {
            IncludePath::Literal(path) => PathBuf::from(path),
            IncludePath::Dynamic(var) => match ctx.resolve(var) {
                None => return Err(EvalError::Absent(var.to_string()).into()),
                Some(value) => PathBuf::from(stringify(Some(value))),
            },
        };
        let relative = if relative.extension().is_none() && !self.default_extension.is_empty() {
            relative.with_extension(self.default_extension)
        } else {
            relative
        };

        let candidate = dir.join(&relative);
        match candidate.canonicalize() {
            Ok(path) if path.is_file() => Ok(path),
            _ => Err(RenderError::IncludeNotFound { path: candidate }),
        }
    }
}
