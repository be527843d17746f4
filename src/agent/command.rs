//! Placeholder substitution for agent command lines.
//!
//! An agent command such as `my-agent --prompt {prompt_file} --turn {turn}`
//! has its `{name}` placeholders replaced before it is split into argv.
//! `{{` and `}}` produce literal braces. Unknown placeholders are an error so
//! a typo never silently turns into an empty argument.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandTemplateError {
    #[error("unknown placeholder '{{{name}}}' at position {position}")]
    UnknownPlaceholder { name: String, position: usize },

    #[error("unclosed '{{' at position {position}")]
    Unclosed { position: usize },

    #[error("empty placeholder '{{}}' at position {position}")]
    Empty { position: usize },
}

/// Replace every `{name}` in `template` with its value from `values`.
///
/// ```
/// use margarita::agent::expand_command;
/// use std::collections::HashMap;
///
/// let values = HashMap::from([("prompt_file", "/tmp/p.md".to_string())]);
/// let command = expand_command("agent -f {prompt_file} {{raw}}", &values).unwrap();
/// assert_eq!(command, "agent -f /tmp/p.md {raw}");
/// ```
pub fn expand_command(
    template: &str,
    values: &HashMap<&str, String>,
) -> Result<String, CommandTemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(i) = rest.find(['{', '}']) {
        out.push_str(&rest[..i]);
        let position = offset + i;
        let tail = &rest[i..];

        let consumed = if tail.starts_with("{{") {
            out.push('{');
            2
        } else if tail.starts_with("}}") {
            out.push('}');
            2
        } else if tail.starts_with('}') {
            // A lone closing brace is literal.
            out.push('}');
            1
        } else {
            let close = tail
                .find('}')
                .ok_or(CommandTemplateError::Unclosed { position })?;
            let name = tail[1..close].trim();
            if name.is_empty() {
                return Err(CommandTemplateError::Empty { position });
            }
            let value = values.get(name).ok_or_else(|| {
                CommandTemplateError::UnknownPlaceholder {
                    name: name.to_string(),
                    position,
                }
            })?;
            out.push_str(value);
            close + 1
        };

        rest = &tail[consumed..];
        offset = position + consumed;
    }
    out.push_str(rest);
    Ok(out)
}
