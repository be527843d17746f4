//! Metadata header extraction.
//!
//! Two surface forms are accepted at the very start of a template (after any
//! blank lines):
//!
//! ```text
//! @task: summarization
//! @owner: search-team
//! ```
//!
//! ```text
//! ---
//! task: summarization
//! owner: search-team
//! ---
//! ```
//!
//! Values are trimmed but otherwise kept as written.

use super::source::SourceMap;
use crate::ast::Metadata;
use crate::error::{ParseError, ParseErrorKind};
use regex::Regex;
use std::sync::LazyLock;

static HEADER_LINE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@([A-Za-z_][\w.-]*):(.*)$").expect("Invalid header line regex")
});

/// An `@...:` line whose key is not a valid metadata key.
static MALFORMED_HEADER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@\S*?:").expect("Invalid malformed header regex"));

/// Parse the header. Returns the metadata and the byte offset where the
/// body begins.
pub(crate) fn parse_header(map: &SourceMap<'_>) -> Result<(Metadata, usize), ParseError> {
    let src = map.src();
    let mut lines = physical_lines(src).peekable();

    // Leading blank lines are not part of the body.
    let mut body_start = 0;
    while let Some(&(start, line)) = lines.peek() {
        if !line.trim().is_empty() {
            body_start = start;
            break;
        }
        lines.next();
        body_start = src.len();
    }

    let mut metadata = Metadata::new();
    let Some(&(first_start, first_line)) = lines.peek() else {
        return Ok((metadata, body_start));
    };

    if first_line.trim_end() == "---" {
        lines.next();
        for (start, line) in lines {
            let trimmed = line.trim();
            if trimmed == "---" {
                return Ok((metadata, (start + line.len() + 1).min(src.len())));
            }
            if trimmed.is_empty() {
                continue;
            }
            let (key, value) = trimmed
                .split_once(':')
                .filter(|(key, _)| is_metadata_key(key.trim()))
                .ok_or_else(|| {
                    map.error(
                        ParseErrorKind::MalformedMetadata(trimmed.to_string()),
                        start,
                    )
                })?;
            metadata.insert(key.trim(), value.trim());
        }
        return Err(map.error(ParseErrorKind::UnclosedMetadata, first_start));
    }

    for (start, line) in lines {
        let line = line.trim_end_matches('\r');
        if let Some(caps) = HEADER_LINE_REGEX.captures(line) {
            metadata.insert(&caps[1], caps[2].trim());
            body_start = (start + line.len() + 1).min(src.len());
            continue;
        }
        if MALFORMED_HEADER_REGEX.is_match(line) {
            return Err(map.error(
                ParseErrorKind::MalformedMetadata(line.to_string()),
                start,
            ));
        }
        body_start = start;
        break;
    }

    Ok((metadata, body_start))
}

fn is_metadata_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('@')
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Lines with their starting byte offsets, without the trailing `\n`.
fn physical_lines(src: &str) -> impl Iterator<Item = (usize, &str)> {
    let mut offset = 0;
    src.split('\n').map(move |line| {
        let start = offset;
        offset += line.len() + 1;
        (start, line)
    })
}
