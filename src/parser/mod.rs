//! Template parser.
//!
//! Parsing runs in three passes over the source:
//!
//! 1. [`header`] strips the metadata header.
//! 2. [`lexer`] splits the body into logical lines (a `<<...>>` block may
//!    span several physical lines) and drops blanks and comments.
//! 3. The block parser here groups lines by indentation, while
//!    [`statement`] decides what each line means.
//!
//! Every failure is a [`ParseError`] carrying the line and column of the
//! offending construct. No partial tree is ever returned.

mod expr;
mod header;
mod lexer;
mod source;
mod statement;
mod text;

use crate::ast::{Expr, Node, Template};
use crate::error::{ParseError, ParseErrorKind};
use lexer::LogicalLine;
use source::SourceMap;
use statement::{Body, Clause, ClauseKind, LineParser, Stmt, fold_chain};

/// Parse template or script source into a [`Template`].
pub fn parse(source: &str) -> Result<Template, ParseError> {
    let map = SourceMap::new(source);
    let (metadata, body_start) = header::parse_header(&map)?;
    let lines = lexer::logical_lines(&map, body_start)?;
    let base_indent = lines.iter().map(|l| l.indent).min().unwrap_or(0);

    let mut parser = BlockParser {
        map: &map,
        lines,
        pos: 0,
    };
    let ast = parser.parse_block(base_indent)?;

    tracing::debug!(
        metadata = metadata.len(),
        nodes = ast.len(),
        "parsed template"
    );
    Ok(Template { metadata, ast })
}

/// Parse a standalone expression, as used in conditions and bindings.
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let map = SourceMap::new(source);
    expr::parse_expr(&map, 0, source.len())
}

struct BlockParser<'m, 'a> {
    map: &'m SourceMap<'a>,
    lines: Vec<LogicalLine>,
    pos: usize,
}

impl BlockParser<'_, '_> {
    fn peek(&self) -> Option<LogicalLine> {
        self.lines.get(self.pos).copied()
    }

    fn parse_line(&self, line: LogicalLine) -> Result<Stmt, ParseError> {
        LineParser::new(self.map, line).parse_statement()
    }

    /// Parse consecutive lines at exactly `indent`, stopping at the first
    /// line indented less.
    fn parse_block(&mut self, indent: usize) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();

        while let Some(line) = self.peek() {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(self.map.error(ParseErrorKind::UnexpectedIndent, line.start));
            }
            self.pos += 1;

            match self.parse_line(line)? {
                Stmt::Node(node) => nodes.push(node),
                Stmt::Empty | Stmt::Ignored => {}
                Stmt::Chain(clauses) => nodes.extend(self.parse_chain(clauses, indent)?),
                Stmt::Loop {
                    var,
                    iterable,
                    body,
                    header,
                    offset,
                } => {
                    let body = self.resolve_body(body, indent, &header, offset)?;
                    nodes.push(Node::Loop {
                        var,
                        iterable,
                        body,
                    });
                }
            }
        }

        Ok(nodes)
    }

    /// Build a conditional from an `if` line plus any `elif`/`else` lines
    /// that follow it at the same indentation.
    fn parse_chain(&mut self, clauses: Vec<Clause>, indent: usize) -> Result<Option<Node>, ParseError> {
        if let Some(first) = clauses.first()
            && first.kind != ClauseKind::If
        {
            let keyword = match first.kind {
                ClauseKind::Elif => "elif",
                _ => "else",
            };
            return Err(self.map.error(
                ParseErrorKind::OrphanBranch(keyword.to_string()),
                first.offset,
            ));
        }

        let mut resolved = Vec::new();
        let mut pending = clauses;
        loop {
            let mut closed = false;
            for clause in pending {
                closed = clause.kind == ClauseKind::Else;
                let body = self.resolve_body(clause.body, indent, &clause.header, clause.offset)?;
                resolved.push((clause.condition, body));
            }
            if closed {
                break;
            }
            let Some(next) = self.peek().filter(|l| l.indent == indent && self.continues_chain(*l)) else {
                break;
            };
            self.pos += 1;
            match self.parse_line(next)? {
                Stmt::Chain(more) => pending = more,
                _ => break,
            }
        }

        Ok(fold_chain(resolved))
    }

    fn continues_chain(&self, line: LogicalLine) -> bool {
        let text = &self.map.src()[line.start..line.end];
        let word = text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .next()
            .unwrap_or_default();
        matches!(word, "elif" | "else")
    }

    fn resolve_body(
        &mut self,
        body: Body,
        indent: usize,
        header: &str,
        offset: usize,
    ) -> Result<Vec<Node>, ParseError> {
        match body {
            Body::Inline(nodes) => Ok(nodes),
            Body::Indented => match self.peek() {
                Some(next) if next.indent > indent => self.parse_block(next.indent),
                _ => Err(self.map.error(
                    ParseErrorKind::MissingBody(header.to_string()),
                    offset,
                )),
            },
        }
    }
}
