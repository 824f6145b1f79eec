//! Document positions reported alongside events and diagnostics.

use std::fmt;

pub use text_size::TextSize;

/// A line and column position in an XML document.
///
/// Both line and column are 0-indexed internally, but displayed as 1-indexed.
/// [`LineCol::UNKNOWN`] stands in when the event source could not provide a
/// location.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct LineCol {
    /// 0-indexed line number
    pub line: u32,
    /// 0-indexed column (in UTF-8 bytes, not characters)
    pub col: u32,
}

impl LineCol {
    /// Sentinel for "position not available".
    pub const UNKNOWN: LineCol = LineCol {
        line: u32::MAX,
        col: u32::MAX,
    };

    #[inline]
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Create from 1-indexed line and column (as displayed to users).
    #[inline]
    pub const fn from_one_indexed(line: u32, col: u32) -> Self {
        Self {
            line: line.saturating_sub(1),
            col: col.saturating_sub(1),
        }
    }

    #[inline]
    pub const fn is_unknown(self) -> bool {
        self.line == u32::MAX && self.col == u32::MAX
    }

    /// 1-indexed line number, or `None` for [`LineCol::UNKNOWN`].
    #[inline]
    pub const fn line_one_indexed(self) -> Option<u32> {
        if self.is_unknown() { None } else { Some(self.line + 1) }
    }

    /// 1-indexed column number, or `None` for [`LineCol::UNKNOWN`].
    #[inline]
    pub const fn col_one_indexed(self) -> Option<u32> {
        if self.is_unknown() { None } else { Some(self.col + 1) }
    }
}

impl fmt::Debug for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LineCol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            f.write_str("?:?")
        } else {
            write!(f, "{}:{}", self.line + 1, self.col + 1)
        }
    }
}

/// Index for converting byte offsets reported by the XML reader into
/// line/column positions.
#[derive(Clone, Debug)]
pub struct LineIndex {
    /// Byte offset of the start of each line
    line_starts: Vec<TextSize>,
    len: TextSize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![TextSize::from(0)];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(offset, _)| TextSize::from((offset + 1) as u32)),
        );

        Self {
            line_starts,
            len: TextSize::of(text),
        }
    }

    /// Convert a byte offset to a line/column position.
    ///
    /// Offsets past the end of the text clamp to the last position.
    pub fn line_col(&self, offset: TextSize) -> LineCol {
        let offset = offset.min(self.len);
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);

        let col = offset - self.line_starts[line];

        LineCol {
            line: line as u32,
            col: col.into(),
        }
    }

    /// Number of lines in the indexed text.
    pub fn len(&self) -> usize {
        self.line_starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len == TextSize::from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_col_display() {
        assert_eq!(LineCol::new(0, 0).to_string(), "1:1");
        assert_eq!(LineCol::new(5, 10).to_string(), "6:11");
        assert_eq!(LineCol::UNKNOWN.to_string(), "?:?");
    }

    #[test]
    fn test_line_col_unknown() {
        assert!(LineCol::UNKNOWN.is_unknown());
        assert!(!LineCol::default().is_unknown());
        assert_eq!(LineCol::UNKNOWN.line_one_indexed(), None);
        assert_eq!(LineCol::from_one_indexed(3, 4).col_one_indexed(), Some(4));
    }

    #[test]
    fn test_line_index_multi_line() {
        let index = LineIndex::new("<a>\n  <b/>\n</a>");

        assert_eq!(index.line_col(TextSize::from(0)), LineCol::new(0, 0));
        assert_eq!(index.line_col(TextSize::from(6)), LineCol::new(1, 2));
        assert_eq!(index.line_col(TextSize::from(11)), LineCol::new(2, 0));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_line_index_clamps_past_end() {
        let index = LineIndex::new("ab");
        assert_eq!(index.line_col(TextSize::from(40)), LineCol::new(0, 2));
    }
}
