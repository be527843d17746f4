//! Configuration model for margarita.
//!
//! `margarita.yaml` holds rendering options, the last-result variable used by
//! scripts, and the `agent` section. Unknown fields are ignored and every
//! field has a default, so an empty file is a valid config.

mod model;
mod operations;


// Re-export public API
pub use model::{CONFIG_FILE_NAME, Config};
