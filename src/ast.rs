//! Abstract syntax tree for Margarita templates and agent scripts.
//!
//! A [`Template`] is produced once by the parser and never mutated. Node
//! order inside every sequence is significant: the renderer and the execution
//! model both walk it depth-first, left to right.
//!
//! `elif` has no node of its own. The parser folds it into a [`Node::Conditional`]
//! placed in the else-slot of the preceding branch.

use serde_json::Value;
use std::fmt;

/// A parsed template: header metadata plus the node sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    /// Header metadata (`@key: value` lines or a `---` front-matter block).
    pub metadata: Metadata,
    /// The body, in declaration order.
    pub ast: Vec<Node>,
}

impl Template {
    /// Whether this template uses any script-only construct
    /// (imports, `@state`, `@effect`).
    pub fn is_script(&self) -> bool {
        contains_script_nodes(&self.ast)
    }
}

fn contains_script_nodes(nodes: &[Node]) -> bool {
    nodes.iter().any(|node| match node {
        Node::FunctionImport { .. } | Node::Effect(_) | Node::StateAssign { .. } => true,
        Node::Conditional {
            branches,
            else_body,
        } => {
            branches.iter().any(|b| contains_script_nodes(&b.body))
                || else_body.as_deref().is_some_and(contains_script_nodes)
        }
        Node::Loop { body, .. } | Node::Block(body) => contains_script_nodes(body),
        Node::Text(_) | Node::Interpolation(_) | Node::Include(_) => false,
    })
}

/// Ordered string-to-string mapping parsed from the template header.
///
/// Values are kept exactly as written (trimmed); nothing is type-coerced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key, replacing an earlier value in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Metadata::new();
        for (k, v) in iter {
            metadata.insert(k, v);
        }
        metadata
    }
}

/// A dotted variable reference such as `user.profile.name`.
///
/// The first segment is an identifier; later segments may also be list
/// indices (`items.0`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarPath(Vec<String>);

impl VarPath {
    /// Parse a dotted path, returning `None` if any segment is malformed.
    pub fn parse(dotted: &str) -> Option<Self> {
        let segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        let first = segments.first()?;
        if !is_identifier(first) {
            return None;
        }
        let valid_tail = segments[1..]
            .iter()
            .all(|s| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_'));
        valid_tail.then_some(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The top-level variable name.
    pub fn root(&self) -> &str {
        &self.0[0]
    }
}

impl fmt::Display for VarPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Whether `s` is a valid variable or function name.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// A node of the template body.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text, emitted verbatim.
    Text(String),
    /// `${path}` inside a text block.
    Interpolation(VarPath),
    /// `if` / `elif` / `else` chain.
    Conditional {
        branches: Vec<Branch>,
        else_body: Option<Vec<Node>>,
    },
    /// `for var in iterable:`
    Loop {
        var: String,
        iterable: Expr,
        body: Vec<Node>,
    },
    /// `[[ path key=value ]]`
    Include(Include),
    /// `from source import a, b` or `import name`. Binds nothing until used.
    FunctionImport { names: Vec<String>, source: String },
    /// `@effect ...`
    Effect(EffectCall),
    /// `@state name = expr`
    StateAssign { name: String, value: Expr },
    /// A `<<...>>` prose segment.
    Block(Vec<Node>),
}

/// One guarded branch of a [`Node::Conditional`].
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: Expr,
    pub body: Vec<Node>,
}

/// An include marker.
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    pub path: IncludePath,
    /// Parameter bindings, evaluated in the including scope.
    pub bindings: Vec<(String, Expr)>,
}

/// Target of an include.
#[derive(Debug, Clone, PartialEq)]
pub enum IncludePath {
    /// A path written directly in the template.
    Literal(String),
    /// `${path}`: the target is read from the context at render time.
    Dynamic(VarPath),
}

impl fmt::Display for IncludePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncludePath::Literal(path) => write!(f, "{}", path),
            IncludePath::Dynamic(path) => write!(f, "${{{}}}", path),
        }
    }
}

/// Built-in effect kinds. Host callables are reached only through
/// [`EffectCall::FunctionCall`] and the injected registry.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectCall {
    /// `@effect func name(args) => target`
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        target: Option<String>,
    },
    /// `@effect tool a, b`
    ToolRegister(Vec<String>),
    /// `@effect run`
    Run,
    /// `@effect clear context`
    ContextClear,
    /// `@effect clear tools`
    ToolClear,
}

impl EffectCall {
    /// Short name used in logs and session events.
    pub fn kind_name(&self) -> &'static str {
        match self {
            EffectCall::FunctionCall { .. } => "function_call",
            EffectCall::ToolRegister(_) => "tool_register",
            EffectCall::Run => "run",
            EffectCall::ContextClear => "context_clear",
            EffectCall::ToolClear => "tool_clear",
        }
    }
}

/// Condition, loop-iterable, binding and argument expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(VarPath),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `needle in haystack` / `needle not in haystack`
    Membership {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negated: bool,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `range(stop)`, `range(start, stop)`, `range(start, stop, step)`
    Range {
        start: Option<Box<Expr>>,
        stop: Box<Expr>,
        step: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn path(dotted: &str) -> Option<Self> {
        VarPath::parse(dotted).map(Expr::Path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}
