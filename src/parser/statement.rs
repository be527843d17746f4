//! Parsing of a single logical line into a statement.
//!
//! Block structure (which lines belong to which opener) is the job of the
//! block parser in `mod.rs`. This module only decides what one line says,
//! including any inline bodies it carries.

use super::expr::parse_expr;
use super::lexer::LogicalLine;
use super::source::SourceMap;
use super::text::parse_text_block;
use crate::ast::{Branch, EffectCall, Expr, Include, IncludePath, Node, VarPath, is_identifier};
use crate::error::{ParseError, ParseErrorKind};
use regex::Regex;
use std::sync::LazyLock;

static STATE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@state\s+([A-Za-z_]\w*)\s*=\s*(\S.*)$").expect("Invalid state regex")
});

static FUNC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@effect\s+func\s+([A-Za-z_]\w*)\s*\((.*)\)\s*(?:=>\s*([A-Za-z_]\w*))?$")
        .expect("Invalid func regex")
});

static TOOL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@effect\s+tools?\s+(.+)$").expect("Invalid tool regex"));

static RUN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@effect\s+run$").expect("Invalid run regex"));

static CLEAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@effect\s+clear\s+(context|tools?)$").expect("Invalid clear regex")
});

static FROM_IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^from\s+([\w.]+)\s+import\s+(.+)$").expect("Invalid from-import regex")
});

static IMPORT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^import\s+([\w.]+)$").expect("Invalid import regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClauseKind {
    If,
    Elif,
    Else,
}

impl ClauseKind {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "if" => Some(ClauseKind::If),
            "elif" => Some(ClauseKind::Elif),
            "else" => Some(ClauseKind::Else),
            _ => None,
        }
    }
}

/// Where an opener's body lives.
#[derive(Debug)]
pub(crate) enum Body {
    /// On the opener's own line.
    Inline(Vec<Node>),
    /// On the following, more deeply indented lines.
    Indented,
}

#[derive(Debug)]
pub(crate) struct Clause {
    pub kind: ClauseKind,
    /// `None` for `else`.
    pub condition: Option<Expr>,
    pub body: Body,
    /// Opener text up to and including its colon, for error messages.
    pub header: String,
    pub offset: usize,
}

#[derive(Debug)]
pub(crate) enum Stmt {
    Node(Node),
    /// `<<>>`
    Empty,
    /// One or more `if`/`elif`/`else` clauses. Every clause but the last has
    /// an inline body.
    Chain(Vec<Clause>),
    Loop {
        var: String,
        iterable: Expr,
        body: Body,
        header: String,
        offset: usize,
    },
    /// A bare line with no meaning.
    Ignored,
}

/// Fold a complete clause chain into nested conditionals. `elif` becomes a
/// conditional in the else-slot of the branch before it. A `None` condition
/// marks the trailing `else`.
pub(crate) fn fold_chain(clauses: Vec<(Option<Expr>, Vec<Node>)>) -> Option<Node> {
    let mut else_body: Option<Vec<Node>> = None;
    for (condition, body) in clauses.into_iter().rev() {
        match condition {
            None => else_body = Some(body),
            Some(condition) => {
                let node = Node::Conditional {
                    branches: vec![Branch { condition, body }],
                    else_body: else_body.take(),
                };
                else_body = Some(vec![node]);
            }
        }
    }
    else_body.and_then(|mut nodes| nodes.pop())
}

pub(crate) struct LineParser<'m, 'a> {
    map: &'m SourceMap<'a>,
    indent: usize,
    pos: usize,
    end: usize,
}

impl<'m, 'a> LineParser<'m, 'a> {
    pub(crate) fn new(map: &'m SourceMap<'a>, line: LogicalLine) -> Self {
        Self {
            map,
            indent: line.indent,
            pos: line.start,
            end: line.end,
        }
    }

    /// Parse the whole line.
    pub(crate) fn parse_statement(mut self) -> Result<Stmt, ParseError> {
        self.skip_ws();
        let rest = self.rest();

        if rest.starts_with("<<") {
            let node = self.text_block(false)?;
            self.expect_end()?;
            return Ok(node.map_or(Stmt::Empty, Stmt::Node));
        }
        if rest.starts_with("[[") {
            let include = self.include()?;
            self.expect_end()?;
            return Ok(Stmt::Node(Node::Include(include)));
        }
        if rest.starts_with('@') {
            return self.directive().map(Stmt::Node);
        }

        match self.keyword() {
            Some("if" | "elif" | "else") => {
                let clauses = self.chain(false)?;
                self.expect_end()?;
                Ok(Stmt::Chain(clauses))
            }
            Some("for") => {
                let stmt = self.loop_stmt(false)?;
                self.expect_end()?;
                Ok(stmt)
            }
            Some("from" | "import") => match self.import() {
                Some(result) => result,
                None => {
                    tracing::debug!(line = rest, "ignoring bare line");
                    Ok(Stmt::Ignored)
                }
            },
            _ => {
                tracing::debug!(line = rest, "ignoring bare line");
                Ok(Stmt::Ignored)
            }
        }
    }

    fn src(&self) -> &'a str {
        self.map.src()
    }

    fn rest(&self) -> &'a str {
        &self.src()[self.pos..self.end]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos >= self.end
    }

    /// The identifier-like word at the cursor, if any.
    fn keyword(&self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        (len > 0).then(|| &rest[..len])
    }

    fn unexpected(&self) -> ParseError {
        let token = self.rest().split_whitespace().next().unwrap_or_default();
        self.map.error(ParseErrorKind::UnexpectedToken(token.to_string()), self.pos)
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn text_block(&mut self, inline: bool) -> Result<Option<Node>, ParseError> {
        let open = self.pos;
        let close = self.src()[open + 2..self.end]
            .find(">>")
            .map(|i| open + 2 + i)
            .ok_or_else(|| self.map.error(ParseErrorKind::UnterminatedText, open))?;
        self.pos = close + 2;
        parse_text_block(self.map, open, close, self.indent, inline)
    }

    /// Parse `if`/`elif`/`else` clauses. Clauses continue on the same line
    /// as long as each body is inline.
    fn chain(&mut self, nested: bool) -> Result<Vec<Clause>, ParseError> {
        let mut clauses = Vec::new();
        loop {
            let offset = self.pos;
            let Some(kind) = self.keyword().and_then(ClauseKind::from_keyword) else {
                break;
            };
            if !clauses.is_empty() && kind == ClauseKind::If {
                break;
            }
            self.pos += self.keyword().map_or(0, str::len);

            let colon = self.find_colon(self.pos).ok_or_else(|| {
                self.map.error(
                    ParseErrorKind::MissingBody(self.rest_from(offset).to_string()),
                    offset,
                )
            })?;
            let condition = match kind {
                ClauseKind::Else => {
                    if !self.src()[self.pos..colon].trim().is_empty() {
                        self.skip_ws();
                        return Err(self.unexpected());
                    }
                    None
                }
                _ => Some(parse_expr(self.map, self.pos, colon)?),
            };
            let header = self.src()[offset..=colon].to_string();
            self.pos = colon + 1;

            let body = self.body(nested, &header, offset)?;
            let inline = matches!(body, Body::Inline(_));
            clauses.push(Clause {
                kind,
                condition,
                body,
                header,
                offset,
            });
            if !inline || kind == ClauseKind::Else {
                break;
            }
            self.skip_ws();
            if !matches!(self.keyword(), Some("elif" | "else")) {
                break;
            }
        }
        Ok(clauses)
    }

    fn loop_stmt(&mut self, nested: bool) -> Result<Stmt, ParseError> {
        let offset = self.pos;
        self.pos += "for".len();
        self.skip_ws();

        let var = match self.keyword() {
            Some(word) if is_identifier(word) => word.to_string(),
            _ => return Err(self.unexpected()),
        };
        self.pos += var.len();
        self.skip_ws();
        if self.keyword() != Some("in") {
            return Err(self.unexpected());
        }
        self.pos += "in".len();

        let colon = self.find_colon(self.pos).ok_or_else(|| {
            self.map.error(
                ParseErrorKind::MissingBody(self.rest_from(offset).to_string()),
                offset,
            )
        })?;
        let iterable_start = self.pos;
        let iterable = parse_expr(self.map, iterable_start, colon)?;
        if !matches!(iterable, Expr::Path(_) | Expr::Range { .. }) {
            return Err(self.map.error(
                ParseErrorKind::InvalidExpression(
                    "loop iterable must be a variable path or range(...)".to_string(),
                ),
                iterable_start,
            ));
        }
        let header = self.src()[offset..=colon].to_string();
        self.pos = colon + 1;

        let body = self.body(nested, &header, offset)?;
        Ok(Stmt::Loop {
            var,
            iterable,
            body,
            header,
            offset,
        })
    }

    fn body(&mut self, nested: bool, header: &str, offset: usize) -> Result<Body, ParseError> {
        if !self.at_end() {
            return self.inline_body().map(Body::Inline);
        }
        if nested {
            return Err(self.map.error(
                ParseErrorKind::MissingBody(header.to_string()),
                offset,
            ));
        }
        Ok(Body::Indented)
    }

    /// A body written on the opener's line: one text block, include,
    /// directive, or nested inline opener.
    fn inline_body(&mut self) -> Result<Vec<Node>, ParseError> {
        let rest = self.rest();
        if rest.starts_with("<<") {
            return Ok(self.text_block(true)?.into_iter().collect());
        }
        if rest.starts_with("[[") {
            return Ok(vec![Node::Include(self.include()?)]);
        }
        if rest.starts_with('@') {
            return Ok(vec![self.directive()?]);
        }
        match self.keyword() {
            Some("if") => {
                let clauses = self.chain(true)?;
                let resolved = clauses
                    .into_iter()
                    .map(|clause| match clause.body {
                        Body::Inline(body) => (clause.condition, body),
                        Body::Indented => (clause.condition, Vec::new()),
                    })
                    .collect();
                Ok(fold_chain(resolved).into_iter().collect())
            }
            Some("for") => match self.loop_stmt(true)? {
                Stmt::Loop {
                    var,
                    iterable,
                    body: Body::Inline(body),
                    ..
                } => Ok(vec![Node::Loop {
                    var,
                    iterable,
                    body,
                }]),
                _ => Err(self.unexpected()),
            },
            _ => Err(self.unexpected()),
        }
    }

    fn rest_from(&self, offset: usize) -> &'a str {
        &self.src()[offset..self.end]
    }

    /// The first `:` at bracket depth zero and outside string literals.
    fn find_colon(&self, from: usize) -> Option<usize> {
        let mut depth = 0i32;
        let mut quote: Option<char> = None;
        let mut chars = self.src()[from..self.end].char_indices();
        while let Some((i, c)) = chars.next() {
            if let Some(q) = quote {
                if c == '\\' {
                    chars.next();
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth == 0 => return Some(from + i),
                _ => {}
            }
        }
        None
    }

    fn include(&mut self) -> Result<Include, ParseError> {
        let open = self.pos;
        let close = self
            .find_outside_quotes(open + 2, "]]")
            .ok_or_else(|| self.map.error(ParseErrorKind::UnterminatedInclude, open))?;
        let mut spans = self.split_words(open + 2, close).into_iter();
        self.pos = close + 2;

        let (path_start, path_end) = spans.next().ok_or_else(|| {
            self.map.error(
                ParseErrorKind::MalformedDirective("include has no path".to_string()),
                open,
            )
        })?;
        let path = self.include_path(path_start, path_end)?;

        let mut bindings = Vec::new();
        for (start, end) in spans {
            let word = &self.src()[start..end];
            let (key, _) = word
                .split_once('=')
                .filter(|(key, value)| is_identifier(key) && !value.is_empty())
                .ok_or_else(|| {
                    self.map.error(
                        ParseErrorKind::MalformedDirective(format!(
                            "include parameter '{}' must be written key=value",
                            word
                        )),
                        start,
                    )
                })?;
            let value = parse_expr(self.map, start + key.len() + 1, end)?;
            bindings.push((key.to_string(), value));
        }

        Ok(Include { path, bindings })
    }

    fn include_path(&self, start: usize, end: usize) -> Result<IncludePath, ParseError> {
        let word = &self.src()[start..end];
        if let Some(inner) = word.strip_prefix("${") {
            let inner = inner.strip_suffix('}').ok_or_else(|| {
                self.map.error(ParseErrorKind::UnterminatedInterpolation, start)
            })?;
            let path = VarPath::parse(inner.trim()).ok_or_else(|| {
                self.map.error(ParseErrorKind::InvalidPath(inner.trim().to_string()), start)
            })?;
            return Ok(IncludePath::Dynamic(path));
        }
        let unquoted = ['"', '\'']
            .iter()
            .find_map(|&q| word.strip_prefix(q).and_then(|w| w.strip_suffix(q)))
            .unwrap_or(word);
        Ok(IncludePath::Literal(unquoted.to_string()))
    }

    fn find_outside_quotes(&self, from: usize, needle: &str) -> Option<usize> {
        let mut quote: Option<char> = None;
        for (i, c) in self.src()[from..self.end].char_indices() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '"' || c == '\'' => quote = Some(c),
                None if self.src()[from + i..].starts_with(needle) => return Some(from + i),
                None => {}
            }
        }
        None
    }

    /// Whitespace-separated spans of `start..end`, keeping quoted strings and
    /// bracketed literals whole.
    fn split_words(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        self.split_top_level(start, end, char::is_whitespace)
            .into_iter()
            .filter(|&(s, e)| s < e)
            .collect()
    }

    fn split_top_level(
        &self,
        start: usize,
        end: usize,
        is_separator: impl Fn(char) -> bool,
    ) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut depth = 0i32;
        let mut quote: Option<char> = None;
        let mut span_start = start;
        for (i, c) in self.src()[start..end].char_indices() {
            let offset = start + i;
            if let Some(q) = quote {
                if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '"' | '\'' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                c if depth == 0 && is_separator(c) => {
                    spans.push((span_start, offset));
                    span_start = offset + c.len_utf8();
                }
                _ => {}
            }
        }
        spans.push((span_start, end));
        spans
    }

    /// `@state` and `@effect` lines. A directive runs to the end of the line.
    fn directive(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let text = self.rest();
        self.pos = self.end;

        let word = text[1..]
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .next()
            .unwrap_or_default();
        let malformed = || {
            self.map.error(
                ParseErrorKind::MalformedDirective(text.to_string()),
                start,
            )
        };

        match word {
            "state" => {
                let caps = STATE_REGEX.captures(text).ok_or_else(malformed)?;
                let value = caps.get(2).ok_or_else(malformed)?;
                Ok(Node::StateAssign {
                    name: caps[1].to_string(),
                    value: parse_expr(self.map, start + value.start(), start + value.end())?,
                })
            }
            "effect" => self.effect(text, start).map(Node::Effect),
            other => Err(self.map.error(
                ParseErrorKind::UnknownDirective(other.to_string()),
                start,
            )),
        }
    }

    fn effect(&self, text: &str, start: usize) -> Result<EffectCall, ParseError> {
        let malformed = || {
            self.map.error(
                ParseErrorKind::MalformedDirective(text.to_string()),
                start,
            )
        };

        if RUN_REGEX.is_match(text) {
            return Ok(EffectCall::Run);
        }
        if let Some(caps) = CLEAR_REGEX.captures(text) {
            return Ok(match &caps[1] {
                "context" => EffectCall::ContextClear,
                _ => EffectCall::ToolClear,
            });
        }
        if let Some(caps) = FUNC_REGEX.captures(text) {
            let args = caps.get(2).ok_or_else(malformed)?;
            let (args_start, args_end) = (start + args.start(), start + args.end());
            let args = if self.src()[args_start..args_end].trim().is_empty() {
                Vec::new()
            } else {
                self.split_top_level(args_start, args_end, |c| c == ',')
                    .into_iter()
                    .map(|(s, e)| parse_expr(self.map, s, e))
                    .collect::<Result<Vec<_>, _>>()?
            };
            return Ok(EffectCall::FunctionCall {
                name: caps[1].to_string(),
                args,
                target: caps.get(3).map(|m| m.as_str().to_string()),
            });
        }
        if let Some(caps) = TOOL_REGEX.captures(text) {
            let names = identifier_list(&caps[1]).ok_or_else(malformed)?;
            return Ok(EffectCall::ToolRegister(names));
        }
        Err(malformed())
    }

    /// `from source import a, b` or `import name`. `None` when the line
    /// only looks like an import.
    fn import(&mut self) -> Option<Result<Stmt, ParseError>> {
        let start = self.pos;
        let text = self.rest();
        self.pos = self.end;

        if let Some(caps) = FROM_IMPORT_REGEX.captures(text) {
            let source = caps[1].to_string();
            return Some(
                identifier_list(&caps[2])
                    .map(|names| Stmt::Node(Node::FunctionImport { names, source }))
                    .ok_or_else(|| {
                        self.map.error(
                            ParseErrorKind::MalformedDirective(text.to_string()),
                            start,
                        )
                    }),
            );
        }
        IMPORT_REGEX.captures(text).map(|caps| {
            let source = caps[1].to_string();
            let name = source.rsplit('.').next().unwrap_or_default().to_string();
            Ok(Stmt::Node(Node::FunctionImport {
                names: vec![name],
                source,
            }))
        })
    }
}

/// A comma-separated list of identifiers.
fn identifier_list(text: &str) -> Option<Vec<String>> {
    let names: Vec<String> = text.split(',').map(|s| s.trim().to_string()).collect();
    names.iter().all(|n| is_identifier(n)).then_some(names)
}
