use serde::{Deserialize, Serialize};

/// Source location attached to AST nodes and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset where the node starts
    pub start: usize,
    /// Byte offset where the node ends (exclusive)
    pub end: usize,
    /// Line number where the node starts (1-indexed)
    pub start_line: usize,
    /// Line number where the node ends (1-indexed)
    pub end_line: usize,
    /// Column number where the node starts (1-indexed)
    pub start_column: usize,
    /// Column number where the node ends (1-indexed)
    pub end_column: usize,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        start_line: usize,
        end_line: usize,
        start_column: usize,
        end_column: usize,
    ) -> Self {
        Self {
            start,
            end,
            start_line,
            end_line,
            start_column,
            end_column,
        }
    }

    /// Extract the text this span covers from the original source.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}
