//! Source positions, carried through every phase so diagnostics can point
//! back at the original text.

use std::fmt;

/// A single point in a source file: 1-based line/column, plus the raw byte
/// offset and length needed to slice the original text for error spans.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
    pub offset: u32,
    pub len: u32,
}

impl Pos {
    #[must_use]
    pub fn new(line: u32, col: u32, offset: u32, len: u32) -> Self {
        Pos { line, col, offset, len }
    }

    /// A placeholder position for synthesized nodes that have no source
    /// counterpart (e.g. the implicit `nil` produced by an empty `then`).
    #[must_use]
    pub fn synthetic() -> Self { Pos::default() }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
