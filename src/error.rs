//! Error types for fiscalxml
//!
//! This module defines all error types used throughout the library.
//! Every user-facing failure carries a human-readable message and, where the
//! underlying XML engine provides them, a structured list of diagnostics for
//! programmatic inspection.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias using fiscalxml Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for fiscalxml operations
#[derive(Error, Debug)]
pub enum Error {
    /// Input given to the document loader was empty
    #[error("empty document: no XML content to load")]
    EmptyDocument,

    /// XML could not be parsed into a tree
    #[error("malformed XML: {}", format_diagnostics(.0))]
    MalformedXml(Vec<Diagnostic>),

    /// Structured value shape violates the codec conventions
    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    /// Query engine was constructed from unparseable XML
    #[error("invalid XML: {0}")]
    InvalidXml(String),

    /// XPath query could not be compiled or evaluated
    #[error("invalid XPath: {0}")]
    InvalidXPath(String),

    /// A canonicalization subset query matched no node
    #[error("XPath matched no node: {0}")]
    XPathNodeNotFound(String),

    /// Schema validation reported failures
    #[error("schema validation failed: {}", format_diagnostics(.0))]
    SchemaValidation(Vec<Diagnostic>),

    /// Character encoding could not be resolved or applied
    #[error("encoding error: {0}")]
    Encoding(String),

    /// XML serialization error
    #[error("serialization error: {0}")]
    Serialize(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    match diagnostics.len() {
        0 => "no diagnostics".to_string(),
        1 => diagnostics[0].to_string(),
        n => format!("{} ({} more)", diagnostics[0], n - 1),
    }
}

/// Severity of a parser or validator diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recoverable issue, processing continued
    Warning,
    /// Error reported by the engine
    #[default]
    Error,
    /// Unrecoverable failure, processing stopped
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// Structured diagnostic from the XML engine or a validator
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    /// Diagnostic message
    pub message: String,
    /// 1-based line in the source, if known
    pub line: Option<usize>,
    /// 1-based column in the source, if known
    pub column: Option<usize>,
    /// Diagnostic severity
    pub severity: Severity,
}

impl Diagnostic {
    /// Create a new diagnostic with the default severity
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            severity: Severity::default(),
        }
    }

    /// Set the source position
    pub fn with_position(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{} at {}:{}: {}", self.severity, line, column, self.message)
            }
            (Some(line), None) => write!(f, "{} at line {}: {}", self.severity, line, self.message),
            _ => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}
