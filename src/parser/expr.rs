//! Expression parsing for conditions, loop iterables, include bindings,
//! `@state` values and function arguments.
//!
//! Precedence, loosest first: `or`, `and`, `not`, then comparison and
//! membership (`==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `not in`), then
//! primaries. Comparisons do not chain.

use super::source::SourceMap;
use crate::ast::{CompareOp, Expr, VarPath};
use crate::error::{ParseError, ParseErrorKind};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Literal(Value),
    Compare(CompareOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    offset: usize,
}

/// Parse the expression in `map.src()[start..end]`.
pub(crate) fn parse_expr(map: &SourceMap<'_>, start: usize, end: usize) -> Result<Expr, ParseError> {
    let tokens = tokenize(map, start, end)?;
    let mut parser = ExprParser {
        map,
        tokens,
        pos: 0,
        end,
    };
    if parser.tokens.is_empty() {
        return Err(map.error(
            ParseErrorKind::InvalidExpression("expected an expression".to_string()),
            start,
        ));
    }
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(map.error(
            ParseErrorKind::UnexpectedToken(describe(&extra.token)),
            extra.offset,
        ));
    }
    Ok(expr)
}

fn tokenize(map: &SourceMap<'_>, start: usize, end: usize) -> Result<Vec<Spanned>, ParseError> {
    let src = &map.src()[..end];
    let mut tokens = Vec::new();
    let mut chars = src[start..].char_indices().map(|(i, c)| (start + i, c)).peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.peek().is_some_and(|&(_, n)| n == '=');
                let op = match (c, followed_by_eq) {
                    ('=', true) => CompareOp::Eq,
                    ('!', true) => CompareOp::Ne,
                    ('<', true) => CompareOp::Le,
                    ('>', true) => CompareOp::Ge,
                    ('<', false) => CompareOp::Lt,
                    ('>', false) => CompareOp::Gt,
                    _ => {
                        return Err(map.error(ParseErrorKind::UnexpectedToken(c.to_string()), offset));
                    }
                };
                if followed_by_eq {
                    chars.next();
                }
                Token::Compare(op)
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, 'r')) => text.push('\r'),
                            Some((_, other)) => text.push(other),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    return Err(map.error(
                        ParseErrorKind::InvalidExpression("unterminated string literal".to_string()),
                        offset,
                    ));
                }
                Token::Literal(Value::String(text))
            }
            '[' | '{' => {
                let close = matching_bracket(src, offset).ok_or_else(|| {
                    map.error(
                        ParseErrorKind::InvalidExpression(format!("unclosed '{}'", c)),
                        offset,
                    )
                })?;
                let value: Value = serde_json::from_str(&src[offset..=close]).map_err(|e| {
                    map.error(ParseErrorKind::InvalidExpression(e.to_string()), offset)
                })?;
                while chars.peek().is_some_and(|&(i, _)| i <= close) {
                    chars.next();
                }
                Token::Literal(value)
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(src, offset)) => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if !(d.is_ascii_digit() || d == '.') {
                        break;
                    }
                    text.push(d);
                    chars.next();
                }
                Token::Literal(Value::Number(parse_number(&text).ok_or_else(|| {
                    map.error(ParseErrorKind::InvalidExpression(format!("invalid number '{}'", text)), offset)
                })?))
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, w)) = chars.peek() {
                    if !(w.is_alphanumeric() || w == '_' || w == '.') {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                match word.to_ascii_lowercase().as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" | "none" => Token::Literal(Value::Null),
                    _ => Token::Word(word),
                }
            }
            other => {
                return Err(map.error(ParseErrorKind::UnexpectedToken(other.to_string()), offset));
            }
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

fn next_is_digit(src: &str, offset: usize) -> bool {
    src[offset + 1..].chars().next().is_some_and(|c| c.is_ascii_digit())
}

fn parse_number(text: &str) -> Option<Number> {
    if text.contains('.') {
        return Number::from_f64(text.parse().ok()?);
    }
    match text.parse::<i64>() {
        Ok(n) => Some(Number::from(n)),
        Err(_) => Number::from_f64(text.parse().ok()?),
    }
}

/// Offset of the bracket closing the one at `open`, skipping string contents.
fn matching_bracket(src: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in src[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

fn describe(token: &Token) -> String {
    match token {
        Token::Word(word) => word.clone(),
        Token::Literal(value) => value.to_string(),
        Token::Compare(op) => op.symbol().to_string(),
        Token::LParen => "(".to_string(),
        Token::RParen => ")".to_string(),
        Token::Comma => ",".to_string(),
    }
}

struct ExprParser<'m, 'a> {
    map: &'m SourceMap<'a>,
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl ExprParser<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_word(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w == keyword)
    }

    fn peek_word_at(&self, ahead: usize, keyword: &str) -> bool {
        matches!(self.tokens.get(self.pos + ahead), Some(Spanned { token: Token::Word(w), .. }) if w == keyword)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |t| t.offset)
    }

    fn error(&self, message: &str) -> ParseError {
        self.map.error(
            ParseErrorKind::InvalidExpression(message.to_string()),
            self.offset(),
        )
    }

    fn expect(&mut self, token: Token, message: &str) -> Result<(), ParseError> {
        if self.peek() == Some(&token) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.peek_word("or") {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.peek_word("and") {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.peek_word("not") {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Compare(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        let negated = self.peek_word("not") && self.peek_word_at(1, "in");
        if negated || self.peek_word("in") {
            self.pos += if negated { 2 } else { 1 };
            let haystack = self.parse_primary()?;
            return Ok(Expr::Membership {
                needle: Box::new(lhs),
                haystack: Box::new(haystack),
                negated,
            });
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let offset = self.offset();
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;
        match token {
            Token::Literal(value) => Ok(Expr::Literal(value)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "expected ')'")?;
                Ok(inner)
            }
            Token::Word(word) if word == "range" && self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                self.parse_range_args(offset)
            }
            Token::Word(word) if matches!(word.as_str(), "and" | "or" | "not" | "in") => {
                Err(self.map.error(ParseErrorKind::UnexpectedToken(word), offset))
            }
            Token::Word(word) => VarPath::parse(&word)
                .map(Expr::Path)
                .ok_or_else(|| self.map.error(ParseErrorKind::InvalidPath(word), offset)),
            other => Err(self.map.error(ParseErrorKind::UnexpectedToken(describe(&other)), offset)),
        }
    }

    fn parse_range_args(&mut self, offset: usize) -> Result<Expr, ParseError> {
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                    continue;
                }
                break;
            }
        }
        self.expect(Token::RParen, "expected ')' after range arguments")?;

        let mut args = args.into_iter().map(Box::new);
        match (args.next(), args.next(), args.next(), args.next()) {
            (Some(stop), None, None, None) => Ok(Expr::Range {
                start: None,
                stop,
                step: None,
            }),
            (Some(start), Some(stop), step, None) => Ok(Expr::Range {
                start: Some(start),
                stop,
                step,
            }),
            _ => Err(self.map.error(
                ParseErrorKind::InvalidExpression("range() takes 1 to 3 arguments".to_string()),
                offset,
            )),
        }
    }
}
