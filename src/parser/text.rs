//! `<<...>>` text blocks and their `${...}` interpolations.

use super::source::SourceMap;
use crate::ast::{Node, VarPath};
use crate::error::{ParseError, ParseErrorKind};

/// Width of a tab when removing indentation from continuation lines.
const TAB_WIDTH: usize = 4;

/// A character of normalized block text with the source offset it came from.
type Located = (usize, char);

/// Build the node for the text block whose `<<` is at `open` and whose `>>`
/// is at `close`.
///
/// `indent` is the indentation of the line that opened the block; up to that
/// much leading whitespace is removed from continuation lines. Statement
/// blocks always end with a newline, inline blocks are kept as written.
/// Returns `None` for a block with no content.
pub(crate) fn parse_text_block(
    map: &SourceMap<'_>,
    open: usize,
    close: usize,
    indent: usize,
    inline: bool,
) -> Result<Option<Node>, ParseError> {
    let mut chars = normalize(map.src(), open + 2, close, indent);
    if chars.is_empty() {
        return Ok(None);
    }
    if !inline && chars.last().is_some_and(|&(_, c)| c != '\n') {
        chars.push((close, '\n'));
    }
    let body = interpolate(map, &chars)?;
    Ok(Some(Node::Block(body)))
}

fn normalize(src: &str, from: usize, to: usize, indent: usize) -> Vec<Located> {
    let mut lines: Vec<Vec<Located>> = vec![Vec::new()];
    let mut iter = src[from..to].char_indices().peekable();
    while let Some((rel, c)) = iter.next() {
        if c == '\r' && iter.peek().is_some_and(|&(_, n)| n == '\n') {
            continue;
        }
        let current = lines.len() - 1;
        lines[current].push((from + rel, c));
        if c == '\n' {
            lines.push(Vec::new());
        }
    }

    // `<<` directly followed by a newline: the newline is not content.
    let opened_with_newline = lines.len() > 1 && lines[0].len() == 1;
    if opened_with_newline {
        lines.remove(0);
    }

    // Indentation in front of the closing `>>` is not content either.
    if lines.len() > 1 && lines.last().is_some_and(|l| l.iter().all(|&(_, c)| c == ' ' || c == '\t')) {
        lines.pop();
    }

    let skip_first = !opened_with_newline;
    lines
        .into_iter()
        .enumerate()
        .flat_map(|(i, line)| {
            if i == 0 && skip_first {
                line
            } else {
                dedent(line, indent)
            }
        })
        .collect()
}

fn dedent(line: Vec<Located>, indent: usize) -> Vec<Located> {
    let mut width = 0;
    let mut skip = 0;
    for &(_, c) in &line {
        let w = match c {
            ' ' => 1,
            '\t' => TAB_WIDTH,
            _ => break,
        };
        if width + w > indent {
            break;
        }
        width += w;
        skip += 1;
    }
    line.into_iter().skip(skip).collect()
}

fn interpolate(map: &SourceMap<'_>, chars: &[Located]) -> Result<Vec<Node>, ParseError> {
    let mut nodes = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    let char_at = |i: usize| chars.get(i).map(|&(_, c)| c);

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c == '$' && char_at(i + 1) == Some('$') && char_at(i + 2) == Some('{') {
            text.push_str("${");
            i += 3;
            continue;
        }
        if c == '$' && char_at(i + 1) == Some('{') {
            let close = chars[i + 2..]
                .iter()
                .take_while(|&&(_, c)| c != '\n')
                .position(|&(_, c)| c == '}')
                .map(|p| i + 2 + p)
                .ok_or_else(|| map.error(ParseErrorKind::UnterminatedInterpolation, offset))?;
            let name: String = chars[i + 2..close].iter().map(|&(_, c)| c).collect();
            let name = name.trim();
            let path = VarPath::parse(name)
                .ok_or_else(|| map.error(ParseErrorKind::InvalidPath(name.to_string()), offset))?;
            if !text.is_empty() {
                nodes.push(Node::Text(std::mem::take(&mut text)));
            }
            nodes.push(Node::Interpolation(path));
            i = close + 1;
            continue;
        }
        text.push(c);
        i += 1;
    }

    if !text.is_empty() {
        nodes.push(Node::Text(text));
    }
    Ok(nodes)
}
