//! Error types shared by the parser, the schema and the top-level pipeline.

use crate::format::FormatError;

/// Structural or validation failure while building a node tree.
///
/// Carries a human-readable message and, when known, the source line the
/// failure was detected on. Every parse-time and validation-time failure uses
/// this one type; the first one raised aborts the compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct NodeError {
    pub message: String,
    pub line: Option<usize>,
}

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
        }
    }

    /// Fills in `line` unless the error already carries one.
    #[must_use]
    pub fn or_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Line number for diagnostics, `0` when unknown.
    #[must_use]
    pub fn line_or_zero(&self) -> usize {
        self.line.unwrap_or(0)
    }
}

/// Any failure of a full compile run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Format(#[from] FormatError),
}
