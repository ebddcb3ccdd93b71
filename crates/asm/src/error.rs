//! Assembler error types.
//!
//! Long-form diagnostics for the codes used here live in
//! [`tpef_errors::Diagnostics`].

use miette::Diagnostic;
use thiserror::Error;

/// A compile error: always carries the source line number, and once the
/// driver has decorated it, the recovered source line.
///
/// Error code `E007`, see [`tpef_errors::Diagnostics::E007`].
#[derive(Debug, Diagnostic, Error)]
#[error("error in line {line}: {message}")]
#[diagnostic(
    code(E007),
    help("Fix the reported line and re-run the assembler; the pipeline is restartable.")
)]
pub struct CompileError {
    /// Source line number the error was raised for.
    pub line: u32,
    /// What went wrong.
    pub message: String,
    /// The recovered source line, filled in by the driver.
    pub source_line: Option<String>,
    /// The underlying error, if this wraps one.
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CompileError {
    /// Creates a compile error for a source line.
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self { line, message: message.into(), source_line: None, cause: None }
    }

    /// Attaches the underlying error.
    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));

        self
    }

    /// Attaches the recovered source line.
    pub fn with_source_line(mut self, source_line: impl Into<String>) -> Self {
        self.source_line = Some(source_line.into());

        self
    }
}

/// A referenced machine component is absent or of the wrong kind.
///
/// Error code `E008`, see [`tpef_errors::Diagnostics::E008`].
#[derive(Debug, Diagnostic, Error)]
#[error("illegal machine: {0}")]
#[diagnostic(
    code(E008),
    help("Check the reference against the target machine description.")
)]
pub struct IllegalMachine(pub String);

impl IllegalMachine {
    /// Wraps the error into a [`CompileError`] for `line`.
    pub fn into_compile_error(self, line: u32) -> CompileError {
        CompileError::new(line, self.0.clone()).with_cause(self)
    }
}
