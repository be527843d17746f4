//! Expression evaluation.
//!
//! Evaluation is pure: it reads a [`Context`] and never writes one. A missing
//! variable evaluates to the absent value (`None`), which is distinct from an
//! explicit `null` only where it matters (strict interpolation, `range`
//! arguments).
//!
//! # Truthiness
//!
//! Absent, `null`, `false`, numeric zero, the empty string and empty
//! lists/mappings are false. Everything else is true.

mod range;

pub use range::{IntRange, RangeIter};

/// Largest `range(...)` turned into a list value (in `@state`, arguments or
/// include bindings). Loops and `in` never build the list.
pub const MAX_RANGE_LIST_LEN: usize = 100_000;

use crate::ast::{CompareOp, Expr};
use crate::context::Context;
use crate::error::EvalError;
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Evaluate an expression. `Ok(None)` is the absent value.
pub fn evaluate(expr: &Expr, ctx: &Context<'_>) -> Result<Option<Value>, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::Path(path) => Ok(ctx.resolve(path).cloned()),
        Expr::Compare { op, lhs, rhs } => {
            let lhs = evaluate(lhs, ctx)?;
            let rhs = evaluate(rhs, ctx)?;
            compare(*op, lhs.as_ref(), rhs.as_ref()).map(|b| Some(Value::Bool(b)))
        }
        Expr::Membership {
            needle,
            haystack,
            negated,
        } => {
            let needle = evaluate(needle, ctx)?;
            let found = if let Expr::Range { .. } = **haystack {
                range_contains(&evaluate_range(haystack, ctx)?, needle.as_ref())
            } else {
                let haystack = evaluate(haystack, ctx)?;
                contains(needle.as_ref(), haystack.as_ref())?
            };
            Ok(Some(Value::Bool(found != *negated)))
        }
        Expr::Not(inner) => Ok(Some(Value::Bool(!evaluate_condition(inner, ctx)?))),
        Expr::And(lhs, rhs) => {
            let result = evaluate_condition(lhs, ctx)? && evaluate_condition(rhs, ctx)?;
            Ok(Some(Value::Bool(result)))
        }
        Expr::Or(lhs, rhs) => {
            let result = evaluate_condition(lhs, ctx)? || evaluate_condition(rhs, ctx)?;
            Ok(Some(Value::Bool(result)))
        }
        Expr::Range { .. } => {
            let range = evaluate_range(expr, ctx)?;
            let len = range.len();
            if len > MAX_RANGE_LIST_LEN {
                return Err(EvalError::RangeTooLarge {
                    len,
                    max: MAX_RANGE_LIST_LEN,
                });
            }
            Ok(Some(Value::Array(range.iter().map(Value::from).collect())))
        }
    }
}

/// Evaluate an expression and apply the truthiness rule.
pub fn evaluate_condition(expr: &Expr, ctx: &Context<'_>) -> Result<bool, EvalError> {
    Ok(is_truthy(evaluate(expr, ctx)?.as_ref()))
}

/// The truthiness rule.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Human-readable kind of a value, used in error messages.
pub fn kind_name(value: Option<&Value>) -> &'static str {
    match value {
        None => "absent",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "list",
        Some(Value::Object(_)) => "mapping",
    }
}

/// Canonical text form used by interpolation.
///
/// Absent and `null` are empty, booleans are `true`/`false`, numbers use
/// their shortest exact decimal form, strings are verbatim, and lists and
/// mappings are compact JSON (mapping order is insertion order, so output is
/// stable for equal input).
pub fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(composite) => composite.to_string(),
    }
}

/// Compare two operands.
///
/// Equality across different kinds is `false` (absent counts as `null`);
/// ordering is defined only between two numbers, two strings or two booleans.
pub fn compare(op: CompareOp, lhs: Option<&Value>, rhs: Option<&Value>) -> Result<bool, EvalError> {
    match op {
        CompareOp::Eq => Ok(values_equal(lhs, rhs)),
        CompareOp::Ne => Ok(!values_equal(lhs, rhs)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = order(lhs, rhs).ok_or(EvalError::TypeMismatch {
                op: op.symbol(),
                lhs: kind_name(lhs),
                rhs: kind_name(rhs),
            })?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn values_equal(lhs: Option<&Value>, rhs: Option<&Value>) -> bool {
    let null = Value::Null;
    let lhs = lhs.unwrap_or(&null);
    let rhs = rhs.unwrap_or(&null);
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(Some(x), Some(y)))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| values_equal(Some(v), Some(w))))
        }
        _ => lhs == rhs,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a.as_f64() == b.as_f64(),
    }
}

fn order(lhs: Option<&Value>, rhs: Option<&Value>) -> Option<Ordering> {
    match (lhs?, rhs?) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Membership test behind `in`.
fn contains(needle: Option<&Value>, haystack: Option<&Value>) -> Result<bool, EvalError> {
    match haystack {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Array(items)) => Ok(items.iter().any(|item| values_equal(needle, Some(item)))),
        Some(Value::Object(map)) => Ok(match needle {
            Some(Value::String(key)) => map.contains_key(key),
            _ => false,
        }),
        Some(Value::String(text)) => match needle {
            Some(Value::String(part)) => Ok(text.contains(part.as_str())),
            other => Err(EvalError::TypeMismatch {
                op: "in",
                lhs: kind_name(other),
                rhs: "string",
            }),
        },
        Some(other) => Err(EvalError::UnsupportedMembership(kind_name(Some(other)))),
    }
}

/// `x in range(...)`: integral numbers are checked arithmetically, anything
/// else is never an element.
fn range_contains(range: &IntRange, needle: Option<&Value>) -> bool {
    let Some(Value::Number(n)) = needle else {
        return false;
    };
    let value = match n.as_i64() {
        Some(i) => i,
        None => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => f as i64,
            _ => return false,
        },
    };
    range.contains(value)
}

/// Evaluate a `range(...)` expression into its integer range.
pub fn evaluate_range(expr: &Expr, ctx: &Context<'_>) -> Result<IntRange, EvalError> {
    let Expr::Range { start, stop, step } = expr else {
        return Err(EvalError::NotIterable(kind_name(evaluate(expr, ctx)?.as_ref())));
    };
    let stop = range_bound(stop, ctx)?;
    let start = match start {
        Some(start) => range_bound(start, ctx)?,
        None => 0,
    };
    let step = match step {
        Some(step) => range_bound(step, ctx)?,
        None => 1,
    };
    IntRange::new(start, stop, step)
}

fn range_bound(expr: &Expr, ctx: &Context<'_>) -> Result<i64, EvalError> {
    match evaluate(expr, ctx)? {
        None => Err(EvalError::Absent(describe(expr))),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| EvalError::NonIntegerRange(n.to_string())),
        Some(other) => Err(EvalError::NonIntegerRange(stringify(Some(&other)))),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Path(path) => path.to_string(),
        _ => "expression".to_string(),
    }
}

/// The items a `for` loop walks.
#[derive(Debug, Clone)]
pub enum LoopItems {
    Range(RangeIter),
    Values(std::vec::IntoIter<Value>),
}

impl Iterator for LoopItems {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            LoopItems::Range(iter) => iter.next().map(Value::from),
            LoopItems::Values(iter) => iter.next(),
        }
    }
}

/// Evaluate a loop iterable.
///
/// Ranges stay lazy. Lists iterate their elements, mappings their keys,
/// strings their characters; absent and `null` iterate nothing.
pub fn evaluate_iterable(expr: &Expr, ctx: &Context<'_>) -> Result<LoopItems, EvalError> {
    if let Expr::Range { .. } = expr {
        return Ok(LoopItems::Range(evaluate_range(expr, ctx)?.iter()));
    }
    let values = match evaluate(expr, ctx)? {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => map.into_iter().map(|(k, _)| Value::String(k)).collect(),
        Some(Value::String(s)) => s.chars().map(|c| Value::String(c.to_string())).collect(),
        Some(other) => return Err(EvalError::NotIterable(kind_name(Some(&other)))),
    };
    Ok(LoopItems::Values(values.into_iter()))
}
