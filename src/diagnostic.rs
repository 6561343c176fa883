use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a transformation-time condition, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A condition that is not an error; processing continues normally
    #[default]
    Warning,
    /// A recoverable error; processing continues but output may be incomplete
    Error,
    /// A non-recoverable error; output is not guaranteed to be usable
    #[serde(alias = "fatal_error")]
    Fatal,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal error",
        }
    }

    /// Parse the names accepted on the command line and in configuration files
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warning" | "warn" => Some(Severity::Warning),
            "error" | "recoverable" => Some(Severity::Error),
            "fatal" | "fatal-error" | "fatal_error" => Some(Severity::Fatal),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where in a source document a condition was detected
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    pub system_id: Option<String>,
    pub public_id: Option<String>,
    /// 1-based line number
    pub line: Option<u64>,
    /// 1-based column number
    pub column: Option<u64>,
}

impl SourceLocation {
    pub fn new(system_id: Option<String>, line: u64, column: u64) -> Self {
        Self {
            system_id,
            public_id: None,
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.system_id.as_deref().unwrap_or("<unknown>"))?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A structured description of a warning, error or fatal error raised during a transformation
#[derive(Debug)]
pub struct Diagnostic {
    message: String,
    severity: Severity,
    location: Option<SourceLocation>,
    cause: Option<Cause>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            location: None,
            cause: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, message)
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// Message with the location appended, if one is known
    pub fn message_and_location(&self) -> String {
        match &self.location {
            Some(location) => format!("{} at {}", self.message, location),
            None => self.message.clone(),
        }
    }

    /// Copy without the cause, which cannot be cloned
    pub fn detached(&self) -> Self {
        let mut detached = Self::new(self.severity, self.message.clone());
        detached.location = self.location.clone();
        if let Some(cause) = &self.cause {
            detached.message = format!("{}: {}", self.message, cause);
        }
        detached
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message_and_location())
    }
}

impl std::error::Error for Diagnostic {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}
