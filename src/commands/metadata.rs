//! Implementation of the `margarita metadata` command.

use super::load_template;
use crate::cli::MetadataArgs;
use margarita::error::MargaritaError;
use serde_json::{Map, Value};

/// Execute the `margarita metadata` command.
///
/// Prints the header entries in source order, values exactly as written.
pub fn cmd_metadata(args: MetadataArgs) -> anyhow::Result<()> {
    let template = load_template(&args.template)?;

    if args.json {
        let object: Map<String, Value> = template
            .metadata
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        let json = serde_json::to_string_pretty(&object).map_err(|e| {
            MargaritaError::UserError(format!("failed to serialize metadata: {}", e))
        })?;
        println!("{}", json);
        return Ok(());
    }

    if template.metadata.is_empty() {
        println!("(no metadata)");
        return Ok(());
    }
    for (key, value) in template.metadata.iter() {
        println!("{}: {}", key, value);
    }
    Ok(())
}
