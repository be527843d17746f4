//! Splits the template body into logical lines.
//!
//! A logical line is one physical line, extended across newlines while a
//! `<<` text block is open. Blank lines and `//` comment lines are dropped
//! here so the block parser only sees statements.

use super::source::SourceMap;
use crate::error::{ParseError, ParseErrorKind};

/// Width of a tab when measuring indentation.
const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogicalLine {
    /// Indentation width of the first physical line.
    pub indent: usize,
    /// Offset of the first non-blank character.
    pub start: usize,
    /// Offset just past the last character (excluding the line terminator).
    pub end: usize,
}

pub(crate) fn logical_lines(
    map: &SourceMap<'_>,
    body_start: usize,
) -> Result<Vec<LogicalLine>, ParseError> {
    let src = map.src();
    let bytes = src.as_bytes();
    let mut lines = Vec::new();
    let mut pos = body_start;

    while pos < src.len() {
        let mut indent = 0;
        let mut start = pos;
        while start < src.len() {
            match bytes[start] {
                b' ' => indent += 1,
                b'\t' => indent += TAB_WIDTH,
                _ => break,
            }
            start += 1;
        }

        let physical_end = find_from(src, start, "\n").unwrap_or(src.len());
        let first_line = src[start..physical_end].trim_end();
        if first_line.is_empty() || first_line.starts_with("//") {
            pos = physical_end + 1;
            continue;
        }

        let end = scan_line_end(map, start)?;
        lines.push(LogicalLine {
            indent,
            start,
            end: trim_end_offset(src, start, end),
        });
        pos = end + 1;
    }

    Ok(lines)
}

/// Find where the logical line starting at `start` ends: the first newline
/// that is outside a text block. Quotes are tracked so a `<<` inside a string
/// literal does not open a block.
fn scan_line_end(map: &SourceMap<'_>, start: usize) -> Result<usize, ParseError> {
    let src = map.src();
    let mut quote: Option<char> = None;
    let mut chars = src[start..].char_indices().peekable();

    while let Some((rel, c)) = chars.next() {
        let offset = start + rel;
        if c == '\n' {
            return Ok(offset);
        }
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '<' if src[offset..].starts_with("<<") => {
                let close = find_from(src, offset + 2, ">>")
                    .ok_or_else(|| map.error(ParseErrorKind::UnterminatedText, offset))?;
                // Resume scanning after the closing `>>`.
                while chars.peek().is_some_and(|&(r, _)| start + r < close + 2) {
                    chars.next();
                }
            }
            _ => {}
        }
    }

    Ok(src.len())
}

fn find_from(src: &str, from: usize, needle: &str) -> Option<usize> {
    src[from..].find(needle).map(|i| from + i)
}

fn trim_end_offset(src: &str, start: usize, end: usize) -> usize {
    start + src[start..end].trim_end().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &str) -> Vec<(usize, String)> {
        let map = SourceMap::new(src);
        logical_lines(&map, 0)
            .unwrap()
            .into_iter()
            .map(|l| (l.indent, src[l.start..l.end].to_string()))
            .collect()
    }

    #[test]
    fn test_skips_blank_and_comment_lines() {
        let src = "// comment\n<<a>>\n\n   \n    // indented comment\n<<b>>";
        assert_eq!(lines(src), [(0, "<<a>>".into()), (0, "<<b>>".into())]);
    }

    #[test]
    fn test_measures_indentation() {
        let src = "if x:\n    <<a>>\n\t<<b>>";
        assert_eq!(
            lines(src),
            [(0, "if x:".into()), (4, "<<a>>".into()), (4, "<<b>>".into())]
        );
    }

    #[test]
    fn test_text_block_spans_lines() {
        let src = "<<\nline one\n// not a comment here\n>>\n<<next>>";
        assert_eq!(
            lines(src),
            [
                (0, "<<\nline one\n// not a comment here\n>>".into()),
                (0, "<<next>>".into())
            ]
        );
    }

    #[test]
    fn test_quoted_angle_brackets_do_not_open_block() {
        let src = "if x == \"<<\":\n    <<yes>>";
        assert_eq!(lines(src).len(), 2);
    }

    #[test]
    fn test_unterminated_text_block() {
        let src = "<<ok>>\n  <<never closed\n";
        let map = SourceMap::new(src);
        let err = logical_lines(&map, 0).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnterminatedText);
        assert_eq!((err.line, err.column), (2, 3));
    }

    #[test]
    fn test_crlf_line_endings() {
        let src = "<<a>>\r\n<<b>>\r\n";
        assert_eq!(lines(src), [(0, "<<a>>".into()), (0, "<<b>>".into())]);
    }
}
