//! Byte offset to line/column mapping for error reporting.

use crate::error::{ParseError, ParseErrorKind};

pub(crate) struct SourceMap<'a> {
    src: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceMap<'a> {
    pub(crate) fn new(src: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { src, line_starts }
    }

    pub(crate) fn src(&self) -> &'a str {
        self.src
    }

    /// 1-based line and column (columns count characters, not bytes).
    pub(crate) fn locate(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.src.len());
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        let line_start = self.line_starts[line_index];
        let column = self.src[line_start..offset].chars().count() + 1;
        (line_index + 1, column)
    }

    pub(crate) fn error(&self, kind: ParseErrorKind, offset: usize) -> ParseError {
        let (line, column) = self.locate(offset);
        ParseError::new(kind, line, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_first_and_later_lines() {
        let map = SourceMap::new("ab\ncd\n\nef");
        assert_eq!(map.locate(0), (1, 1));
        assert_eq!(map.locate(1), (1, 2));
        assert_eq!(map.locate(3), (2, 1));
        assert_eq!(map.locate(7), (4, 1));
        assert_eq!(map.locate(8), (4, 2));
    }

    #[test]
    fn test_columns_count_characters() {
        let map = SourceMap::new("世界${x");
        let offset = "世界".len();
        assert_eq!(map.locate(offset), (1, 3));
    }
}
