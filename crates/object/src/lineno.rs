use crate::base::*;
use crate::refs::SafeRef;

/// One line-number entry: a source line and the instruction element it
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumElement {
    /// Source line number.
    pub line: HalfWord,
    /// The instruction element.
    pub instruction: Option<SafeRef>,
}

/// Line numbers of one procedure.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LineNumProcedure {
    /// The procedure symbol in the linked symbol table.
    pub symbol: Option<SafeRef>,
    /// Ordered line entries.
    pub lines: Vec<LineNumElement>,
}

impl LineNumProcedure {
    /// Appends a line entry.
    pub fn add_line(&mut self, line: HalfWord, instruction: Option<SafeRef>) {
        self.lines.push(LineNumElement { line, instruction });
    }
}
