use thiserror::Error;

use crate::config::ConfigError;
use crate::diagnostic::{Diagnostic, SourceLocation};

/// Main library error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No result target set before the document started")]
    NoResult,

    #[error("Transformation aborted: {0}")]
    Aborted(Box<Diagnostic>),

    #[error("XML parse error at {location}: {message}")]
    Parse {
        location: SourceLocation,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Event handler error: {0}")]
    Sax(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TransformError {
    /// Abort with the given diagnostic as the reason
    pub fn aborted(diagnostic: &Diagnostic) -> Self {
        TransformError::Aborted(Box::new(diagnostic.detached()))
    }

    pub fn invalid_argument(details: impl Into<String>) -> Self {
        TransformError::InvalidArgument(details.into())
    }

    /// The diagnostic behind an abort, if this error is one
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            TransformError::Aborted(diagnostic) => Some(diagnostic),
            _ => None,
        }
    }

    /// Turn this failure into a fatal diagnostic so it can be routed through a listener
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            TransformError::Aborted(diagnostic) => diagnostic.detached(),
            TransformError::Parse { location, message } => {
                Diagnostic::fatal(message.clone()).with_location(location.clone())
            }
            other => Diagnostic::fatal(other.to_string()),
        }
    }
}

impl From<std::fmt::Error> for TransformError {
    fn from(err: std::fmt::Error) -> Self {
        TransformError::Sax(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TransformError>;
