//! Margarita: a template and script engine for composing prompts and driving
//! multi-turn agent sessions.
//!
//! - [`parser`] turns source text into a [`ast::Template`]
//! - [`render`] walks a template against a [`context::Context`]
//! - [`exec`] interprets scripts, suspending at each `@effect run`
//! - [`agent`] answers those suspensions
//!
//! ```
//! use margarita::{context::Context, parser::parse, render::render};
//! use serde_json::json;
//! use std::path::Path;
//!
//! let template = parse("for n in names: <<Hi ${n}! >>")?;
//! let ctx = Context::from_json(json!({"names": ["Ada", "Lin"]}))?;
//! assert_eq!(render(&template.ast, &ctx, Path::new("."))?, "Hi Ada! Hi Lin! ");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod agent;
pub mod ast;
pub mod config;
pub mod context;
pub mod error;
pub mod eval;
pub mod events;
pub mod exec;
pub mod exit_codes;
pub mod fs;
pub mod include;
pub mod parser;
pub mod render;

#[cfg(test)]
mod test_support;
