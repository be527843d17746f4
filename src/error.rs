//! Error types for margarita.
//!
//! Each layer has its own error enum (parse, evaluate, render, effect) so
//! callers of the core API can match precisely. `MargaritaError` wraps all of
//! them for the CLI and maps each to an exit code.

use crate::exit_codes;
use std::path::PathBuf;
use thiserror::Error;

/// A syntax error, located by 1-based line and column.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at line {line}, column {column}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, line: usize, column: usize) -> Self {
        Self { kind, line, column }
    }
}

/// What went wrong while parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unterminated interpolation '${{'")]
    UnterminatedInterpolation,

    #[error("unterminated text block '<<'")]
    UnterminatedText,

    #[error("unterminated include '[['")]
    UnterminatedInclude,

    #[error("invalid variable path '{0}'")]
    InvalidPath(String),

    #[error("block opener '{0}' has no body")]
    MissingBody(String),

    #[error("unexpected indentation")]
    UnexpectedIndent,

    #[error("'{0}' without a preceding 'if'")]
    OrphanBranch(String),

    #[error("malformed metadata line '{0}'")]
    MalformedMetadata(String),

    #[error("metadata block opened with '---' is never closed")]
    UnclosedMetadata,

    #[error("unknown directive '@{0}'")]
    UnknownDirective(String),

    #[error("malformed directive: {0}")]
    MalformedDirective(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("unexpected '{0}'")]
    UnexpectedToken(String),
}

/// Expression evaluation failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A value that must exist was absent.
    #[error("variable '{0}' is not defined")]
    Absent(String),

    /// An ordering comparison between values of different (or non-scalar) kinds.
    #[error("cannot compare {lhs} {op} {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("range() step must not be zero")]
    ZeroStep,

    #[error("range() argument '{0}' is not an integer")]
    NonIntegerRange(String),

    #[error("{0} is not iterable")]
    NotIterable(&'static str),

    #[error("'in' is not supported against {0}")]
    UnsupportedMembership(&'static str),

    /// A range used as a list value would exceed [`MAX_RANGE_LIST_LEN`](crate::eval::MAX_RANGE_LIST_LEN).
    #[error("range() has {len} elements, more than the {max} allowed outside a for loop")]
    RangeTooLarge { len: usize, max: usize },
}

/// Rendering failure. Rendering is all-or-nothing: no partial output
/// accompanies any of these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("included template not found: {}", path.display())]
    IncludeNotFound { path: PathBuf },

    #[error("include cycle detected: {}", format_chain(chain))]
    IncludeCycle { chain: Vec<PathBuf> },

    #[error("failed to parse included template '{}': {source}", path.display())]
    IncludeParse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("failed to read included template '{}': {message}", path.display())]
    IncludeRead { path: PathBuf, message: String },

    #[error(transparent)]
    Eval(#[from] EvalError),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failure of a script effect or of the execution protocol itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    /// The script called a function it never imported.
    #[error("unknown function '{0}' (import it with 'from <module> import {0}')")]
    UnknownFunction(String),

    /// The function was imported but the host registry does not provide it.
    #[error("function '{name}' imported from '{module}' is not provided by the host registry")]
    RegistryMiss { name: String, module: String },

    #[error("function '{name}' failed: {message}")]
    FunctionFailed { name: String, message: String },

    #[error("tool '{0}' is not registered for this run")]
    UnknownTool(String),

    #[error("agent run failed: {0}")]
    RunFailed(String),

    #[error("agent run was cancelled")]
    Cancelled,

    /// `step` was called in a way that does not match the model's state.
    #[error("invalid step: {0}")]
    InvalidStep(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Main error type for margarita operations.
#[derive(Error, Debug)]
pub enum MargaritaError {
    /// Bad arguments, unreadable files, invalid configuration.
    #[error("{0}")]
    UserError(String),

    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Script failed: {0}")]
    Effect(#[from] EffectError),
}

impl MargaritaError {
    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MargaritaError::UserError(_) => exit_codes::USER_ERROR,
            MargaritaError::Parse(_) => exit_codes::PARSE_FAILURE,
            MargaritaError::Render(_) => exit_codes::RENDER_FAILURE,
            MargaritaError::Effect(_) => exit_codes::EFFECT_FAILURE,
        }
    }
}

/// Result type alias for margarita operations.
pub type Result<T> = std::result::Result<T, MargaritaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_error_has_correct_exit_code() {
        let err = MargaritaError::UserError("bad argument".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn layered_errors_have_distinct_exit_codes() {
        let parse: MargaritaError =
            ParseError::new(ParseErrorKind::UnterminatedText, 1, 1).into();
        let render: MargaritaError = RenderError::Eval(EvalError::ZeroStep).into();
        let effect: MargaritaError = EffectError::Cancelled.into();

        assert_eq!(parse.exit_code(), exit_codes::PARSE_FAILURE);
        assert_eq!(render.exit_code(), exit_codes::RENDER_FAILURE);
        assert_eq!(effect.exit_code(), exit_codes::EFFECT_FAILURE);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = ParseError::new(ParseErrorKind::UnterminatedInterpolation, 3, 7);
        assert_eq!(
            err.to_string(),
            "unterminated interpolation '${' at line 3, column 7"
        );

        let err = RenderError::IncludeCycle {
            chain: vec![PathBuf::from("/t/a.mg"), PathBuf::from("/t/b.mg"), PathBuf::from("/t/a.mg")],
        };
        assert_eq!(
            err.to_string(),
            "include cycle detected: /t/a.mg -> /t/b.mg -> /t/a.mg"
        );

        let err = EvalError::TypeMismatch {
            op: ">",
            lhs: "string",
            rhs: "number",
        };
        assert_eq!(err.to_string(), "cannot compare string > number");
    }
}
