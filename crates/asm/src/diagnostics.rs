//! The assembly-parser diagnostic store.
//!
//! Warnings and errors accumulate in ordered sets keyed by line number,
//! recovered source line and message, which both sorts the reports for
//! output and deduplicates repeated reports from parser retries.

use std::collections::BTreeSet;

/// One reported message with its source position.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct CompilerMessage {
    /// Source line number, 1-based. 0 when unknown.
    pub line: u32,
    /// The recovered source line.
    pub assembler_line: String,
    /// The message.
    pub message: String,
}

impl std::fmt::Display for CompilerMessage {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.line == 0 {
            write!(formatter, "{}", self.message)
        } else {
            write!(formatter, "line {}: {}\n\t{}", self.line, self.assembler_line, self.message)
        }
    }
}

/// Collects warnings and errors of one assembly run.
#[derive(Debug, Default)]
pub struct AssemblyParserDiagnostic {
    listing: String,
    line_starts: Vec<usize>,
    warnings: BTreeSet<CompilerMessage>,
    code_errors: BTreeSet<CompilerMessage>,
    other_errors: BTreeSet<CompilerMessage>,
}

impl AssemblyParserDiagnostic {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the assembly listing. Also clears all reports.
    pub fn reset(&mut self, listing: &str) {
        self.clear();

        self.listing = listing.to_string();
        self.line_starts = std::iter::once(0)
            .chain(
                listing
                    .bytes()
                    .enumerate()
                    .filter(|&(_, byte)| byte == b'\n')
                    .map(|(position, _)| position + 1),
            )
            .collect();
    }

    /// Clears all accumulated reports.
    pub fn clear(&mut self) {
        self.warnings.clear();
        self.code_errors.clear();
        self.other_errors.clear();
    }

    /// Records a warning for a source line.
    pub fn add_warning(&mut self, line: u32, message: impl Into<String>) {
        let message = CompilerMessage {
            line,
            assembler_line: self.code_line(line),
            message: message.into(),
        };

        self.warnings.insert(message);
    }

    /// Records an error for a source line.
    pub fn add_error(&mut self, line: u32, message: impl Into<String>) {
        let message = CompilerMessage {
            line,
            assembler_line: self.code_line(line),
            message: message.into(),
        };

        self.code_errors.insert(message);
    }

    /// Records an error with no source position.
    pub fn add_other_error(&mut self, message: impl Into<String>) {
        let message = CompilerMessage { message: message.into(), ..Default::default() };

        self.other_errors.insert(message);
    }

    /// The accumulated warnings, ordered by line.
    pub fn warnings(&self) -> impl Iterator<Item = &CompilerMessage> {
        self.warnings.iter()
    }

    /// The accumulated source errors, ordered by line.
    pub fn errors(&self) -> impl Iterator<Item = &CompilerMessage> {
        self.code_errors.iter()
    }

    /// The accumulated positionless errors.
    pub fn other_errors(&self) -> impl Iterator<Item = &CompilerMessage> {
        self.other_errors.iter()
    }

    /// The recovered source line for a 1-based line number.
    pub fn code_line(&self, line: u32) -> String {
        let index = (line as usize).saturating_sub(1);

        match self.line_starts.get(index) {
            Some(&start) => {
                let end = self.listing[start..]
                    .find('\n')
                    .map(|offset| start + offset)
                    .unwrap_or(self.listing.len());

                self.listing[start..end].to_string()
            }
            None => "Invalid line number info, probably last line of file.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_line_recovery() {
        let mut diagnostics = AssemblyParserDiagnostic::new();
        diagnostics.reset("first\nsecond\nthird");

        assert_eq!(diagnostics.code_line(1), "first");
        assert_eq!(diagnostics.code_line(2), "second");
        assert_eq!(diagnostics.code_line(3), "third");
        assert!(diagnostics.code_line(9).starts_with("Invalid line number"));
    }

    #[test]
    fn test_deduplication_and_ordering() {
        let mut diagnostics = AssemblyParserDiagnostic::new();
        diagnostics.reset("a\nb\n");

        diagnostics.add_warning(2, "wide value");
        diagnostics.add_warning(1, "early");
        diagnostics.add_warning(2, "wide value");

        let lines: Vec<u32> = diagnostics.warnings().map(|message| message.line).collect();
        assert_eq!(lines, vec![1, 2]);
    }

    #[test]
    fn test_reset_clears_reports() {
        let mut diagnostics = AssemblyParserDiagnostic::new();
        diagnostics.reset("x\n");
        diagnostics.add_error(1, "boom");
        diagnostics.add_other_error("general");

        assert_eq!(diagnostics.errors().count(), 1);
        assert_eq!(diagnostics.other_errors().count(), 1);

        diagnostics.reset("y\n");

        assert_eq!(diagnostics.errors().count(), 0);
        assert_eq!(diagnostics.other_errors().count(), 0);
    }
}
