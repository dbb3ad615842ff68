use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// A single compiler message. Line and column are 1-based and refer to the compiled unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub text: String,
}

impl Diagnostic {
    pub fn error(line: usize, column: usize, text: impl Into<String>) -> Self {
        Self { severity: Severity::Error, line, column, text: text.into() }
    }

    pub fn warning(line: usize, column: usize, text: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, line, column, text: text.into() }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    pub fn location(&self) -> String {
        format!("({},{})", self.line, self.column)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.location(), self.severity.label(), self.text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(|d| d.is_warning())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First error message, used as a one-line summary.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.errors().next()
    }
}

impl From<Diagnostic> for Diagnostics {
    fn from(diagnostic: Diagnostic) -> Self {
        Self { entries: vec![diagnostic] }
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// One-way text sink for lifecycle and compiler output.
pub trait DiagnosticSink: Send + Sync {
    fn log_error(&self, text: &str);
    fn log_warning(&self, text: &str);
    fn log_info(&self, _text: &str) {}
}

/// Prints tagged lines to the console.
#[derive(Debug, Clone)]
pub struct ConsoleSink {
    tag: &'static str,
}

impl ConsoleSink {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new("script")
    }
}

impl DiagnosticSink for ConsoleSink {
    fn log_error(&self, text: &str) {
        eprintln!("[{}] error: {text}", self.tag);
    }

    fn log_warning(&self, text: &str) {
        eprintln!("[{}] warning: {text}", self.tag);
    }

    fn log_info(&self, text: &str) {
        println!("[{}] {text}", self.tag);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    Error(String),
    Warning(String),
    Info(String),
}

impl LogLine {
    pub fn text(&self) -> &str {
        match self {
            LogLine::Error(text) | LogLine::Warning(text) | LogLine::Info(text) => text,
        }
    }
}

/// Buffers everything it receives. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<LogLine> {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *lines)
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|line| match line {
                LogLine::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|line| match line {
                LogLine::Warning(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, line: LogLine) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }
}

impl DiagnosticSink for MemorySink {
    fn log_error(&self, text: &str) {
        self.push(LogLine::Error(text.to_string()));
    }

    fn log_warning(&self, text: &str) {
        self.push(LogLine::Warning(text.to_string()));
    }

    fn log_info(&self, text: &str) {
        self.push(LogLine::Info(text.to_string()));
    }
}

/// Routes compiler diagnostics to a sink. Errors are always reported; warnings only when enabled.
#[derive(Clone)]
pub struct ReportPrinter {
    sink: Arc<dyn DiagnosticSink>,
    log_warnings: bool,
}

impl ReportPrinter {
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { sink, log_warnings: false }
    }

    pub fn with_warnings(sink: Arc<dyn DiagnosticSink>, log_warnings: bool) -> Self {
        Self { sink, log_warnings }
    }

    pub fn log_warnings(&self) -> bool {
        self.log_warnings
    }

    pub fn set_log_warnings(&mut self, enabled: bool) {
        self.log_warnings = enabled;
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    pub fn print(&self, diagnostic: &Diagnostic) {
        if diagnostic.is_warning() {
            if self.log_warnings {
                self.sink.log_warning(&diagnostic.text);
            }
        } else {
            self.sink.log_error(&format!("{} {}", diagnostic.location(), diagnostic.text));
        }
    }

    pub fn print_all(&self, diagnostics: &Diagnostics) {
        for diagnostic in diagnostics.iter() {
            self.print(diagnostic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::warning(1, 7, "unknown base type 'Thing'"));
        diagnostics.push(Diagnostic::error(3, 2, "expected '{'"));
        diagnostics
    }

    #[test]
    fn warnings_are_suppressed_by_default() {
        let sink = MemorySink::new();
        let printer = ReportPrinter::new(Arc::new(sink.clone()));
        printer.print_all(&sample());
        assert!(sink.warnings().is_empty());
        assert_eq!(sink.errors(), vec!["(3,2) expected '{'".to_string()]);
    }

    #[test]
    fn warnings_are_logged_when_enabled() {
        let sink = MemorySink::new();
        let printer = ReportPrinter::with_warnings(Arc::new(sink.clone()), true);
        printer.print_all(&sample());
        assert_eq!(sink.warnings(), vec!["unknown base type 'Thing'".to_string()]);
        assert_eq!(sink.errors().len(), 1);
    }

    #[test]
    fn counts_only_errors() {
        let diagnostics = sample();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.error_count(), 1);
        assert_eq!(diagnostics.first_error().map(|d| d.line), Some(3));
    }
}
