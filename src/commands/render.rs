//! Implementation of the `margarita render` command.

use super::{load_context, load_template, template_dir};
use crate::cli::RenderArgs;
use anyhow::Context as _;
use margarita::config::Config;
use margarita::error::MargaritaError;
use margarita::fs::atomic_write_file;
use margarita::render::Renderer;
use std::io::Write;

/// Execute the `margarita render` command.
///
/// Rendering is all-or-nothing: nothing is printed or written unless the
/// whole template renders.
pub fn cmd_render(config: &Config, args: RenderArgs) -> anyhow::Result<()> {
    let template = load_template(&args.template)
        .with_context(|| format!("cannot render '{}'", args.template.display()))?;
    let ctx = load_context(args.context.as_deref())?;

    let mut options = config.render_options();
    options.strict_variables |= args.strict;
    let base_dir = args
        .base_dir
        .as_deref()
        .unwrap_or_else(|| template_dir(&args.template));

    let output = Renderer::new(options)
        .render(&template.ast, &ctx, base_dir)
        .map_err(MargaritaError::from)
        .with_context(|| format!("cannot render '{}'", args.template.display()))?;

    match &args.output {
        Some(path) => atomic_write_file(path, &output)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(output.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|e| MargaritaError::UserError(format!("failed to write output: {}", e)))?;
        }
    }
    Ok(())
}
