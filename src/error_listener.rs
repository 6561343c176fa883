//! Error notification.
//!
//! A transformation engine reports every warning, recoverable error and fatal
//! error through an [`ErrorListener`] instead of failing on its own. The value the
//! listener returns decides what happens next: `Ok(())` lets the engine carry on,
//! any `Err` is propagated back out of the event that triggered the report and
//! ends the transformation.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::diagnostic::{Diagnostic, Severity};
use crate::error::{Result, TransformError};

/// Verbosity levels for diagnostic reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerbosityLevel {
    /// Only show fatal errors
    Quiet,
    /// Show every diagnostic on one line
    #[default]
    Normal,
    /// Add the cause chain
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// Receiver of transformation-time diagnostics.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorListener: Send {
    /// A condition that is not an error. The engine continues and must still be
    /// able to process the document to the end.
    fn warning(&mut self, diagnostic: &Diagnostic) -> Result<()>;

    /// A recoverable error. The engine continues if `Ok` is returned, but the
    /// result may not be error-free.
    fn error(&mut self, diagnostic: &Diagnostic) -> Result<()>;

    /// A non-recoverable error. The engine may keep going if `Ok` is returned;
    /// the output is not guaranteed to be usable.
    fn fatal_error(&mut self, diagnostic: &Diagnostic) -> Result<()>;

    /// Single entry point: dispatch on the tagged severity
    fn report(&mut self, severity: Severity, diagnostic: &Diagnostic) -> Result<()> {
        match severity {
            Severity::Warning => self.warning(diagnostic),
            Severity::Error => self.error(diagnostic),
            Severity::Fatal => self.fatal_error(diagnostic),
        }
    }
}

/// Route a diagnostic to the listener method matching `severity`.
///
/// Calls the three notification methods directly, so listeners that override
/// `report` are bypassed.
pub fn notify(
    listener: &mut dyn ErrorListener,
    severity: Severity,
    diagnostic: &Diagnostic,
) -> Result<()> {
    match severity {
        Severity::Warning => listener.warning(diagnostic),
        Severity::Error => listener.error(diagnostic),
        Severity::Fatal => listener.fatal_error(diagnostic),
    }
}

impl<L: ErrorListener + ?Sized> ErrorListener for Box<L> {
    fn warning(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        (**self).warning(diagnostic)
    }

    fn error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        (**self).error(diagnostic)
    }

    fn fatal_error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        (**self).fatal_error(diagnostic)
    }

    fn report(&mut self, severity: Severity, diagnostic: &Diagnostic) -> Result<()> {
        (**self).report(severity, diagnostic)
    }
}

/// Takes no action for any diagnostic
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorListener;

impl ErrorListener for NoopErrorListener {
    fn warning(&mut self, _diagnostic: &Diagnostic) -> Result<()> {
        Ok(())
    }

    fn error(&mut self, _diagnostic: &Diagnostic) -> Result<()> {
        Ok(())
    }

    fn fatal_error(&mut self, _diagnostic: &Diagnostic) -> Result<()> {
        Ok(())
    }
}

/// Writes diagnostics to the console error stream (or any writer) and never aborts.
///
/// This is where diagnostics end up when no listener has been registered.
pub struct ConsoleErrorListener {
    out: Box<dyn Write + Send>,
    verbosity: VerbosityLevel,
    show_timestamps: bool,
    show_colors: bool,
}

impl ConsoleErrorListener {
    /// Create a listener writing to stderr with the specified verbosity
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            out: Box::new(std::io::stderr()),
            verbosity,
            show_timestamps: false,
            show_colors: atty::is(atty::Stream::Stderr),
        }
    }

    /// Create a listener writing to an arbitrary sink, without colors
    pub fn with_writer(writer: impl Write + Send + 'static, verbosity: VerbosityLevel) -> Self {
        Self {
            out: Box::new(writer),
            verbosity,
            show_timestamps: false,
            show_colors: false,
        }
    }

    pub fn with_timestamps(mut self, show_timestamps: bool) -> Self {
        self.show_timestamps = show_timestamps;
        self
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    fn colorize(&self, text: &str, severity: Severity) -> String {
        if !self.show_colors {
            return text.to_string();
        }
        let color = match severity {
            Severity::Warning => "33",
            Severity::Error => "31",
            Severity::Fatal => "1;31",
        };
        format!("\x1b[{}m{}\x1b[0m", color, text)
    }

    /// Format a diagnostic as it would be written for `severity`, or `None`
    /// if the verbosity hides it. The severity is that of the listener method
    /// invoked, not the one recorded on the diagnostic.
    pub fn format_diagnostic(
        &self,
        severity: Severity,
        diagnostic: &Diagnostic,
    ) -> Option<String> {
        if self.verbosity == VerbosityLevel::Quiet && severity < Severity::Fatal {
            return None;
        }

        let timestamp = if self.show_timestamps {
            format!("[{}] ", chrono::Utc::now().format("%H:%M:%S"))
        } else {
            String::new()
        };
        let mut output = format!(
            "{}{}: {}",
            timestamp,
            self.colorize(severity.label(), severity),
            diagnostic.message_and_location()
        );

        if self.verbosity >= VerbosityLevel::Verbose {
            let mut current: &dyn std::error::Error = diagnostic;
            while let Some(source) = current.source() {
                output.push_str(&format!("\n  caused by: {}", source));
                current = source;
            }
        }

        if self.verbosity == VerbosityLevel::Debug {
            output.push_str(&format!("\n  debug: {:?}", diagnostic));
        }

        Some(output)
    }

    fn write(&mut self, severity: Severity, diagnostic: &Diagnostic) -> Result<()> {
        if let Some(line) = self.format_diagnostic(severity, diagnostic) {
            writeln!(self.out, "{}", line)?;
            self.out.flush()?;
        }
        Ok(())
    }
}

impl Default for ConsoleErrorListener {
    fn default() -> Self {
        Self::new(VerbosityLevel::Normal)
    }
}

impl ErrorListener for ConsoleErrorListener {
    fn warning(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.write(Severity::Warning, diagnostic)
    }

    fn error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.write(Severity::Error, diagnostic)
    }

    fn fatal_error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.write(Severity::Fatal, diagnostic)
    }
}

/// Forwards to an inner listener, then aborts once a diagnostic reaches `threshold`
pub struct ThresholdErrorListener<L> {
    inner: L,
    threshold: Severity,
}

impl<L: ErrorListener> ThresholdErrorListener<L> {
    pub fn new(inner: L, threshold: Severity) -> Self {
        Self { inner, threshold }
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn into_inner(self) -> L {
        self.inner
    }

    fn check(&self, severity: Severity, diagnostic: &Diagnostic) -> Result<()> {
        if severity >= self.threshold {
            tracing::debug!(%severity, threshold = %self.threshold, "aborting transformation");
            return Err(TransformError::aborted(diagnostic));
        }
        Ok(())
    }
}

impl<L: ErrorListener> ErrorListener for ThresholdErrorListener<L> {
    fn warning(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.inner.warning(diagnostic)?;
        self.check(Severity::Warning, diagnostic)
    }

    fn error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.inner.error(diagnostic)?;
        self.check(Severity::Error, diagnostic)
    }

    fn fatal_error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.inner.fatal_error(diagnostic)?;
        self.check(Severity::Fatal, diagnostic)
    }
}

/// Records every diagnostic it receives. Clones share the same record.
#[derive(Debug, Default, Clone)]
pub struct CollectingErrorListener {
    records: Arc<Mutex<Vec<(Severity, Diagnostic)>>>,
}

impl CollectingErrorListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, severity: Severity, diagnostic: &Diagnostic) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push((severity, diagnostic.detached()));
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Severities in the order they were received
    pub fn severities(&self) -> Vec<Severity> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().map(|(severity, _)| *severity).collect()
    }

    /// Messages in the order they were received
    pub fn messages(&self) -> Vec<String> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .map(|(_, diagnostic)| diagnostic.message().to_string())
            .collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.severities().into_iter().filter(|s| *s == severity).count()
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.severities().into_iter().max()
    }
}

impl ErrorListener for CollectingErrorListener {
    fn warning(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.push(Severity::Warning, diagnostic);
        Ok(())
    }

    fn error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.push(Severity::Error, diagnostic);
        Ok(())
    }

    fn fatal_error(&mut self, diagnostic: &Diagnostic) -> Result<()> {
        self.push(Severity::Fatal, diagnostic);
        Ok(())
    }
}
