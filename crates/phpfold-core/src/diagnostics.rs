//! Diagnostics channel: parse problems, per-pass change reports, and the
//! convergence warning. Observational only; nothing here feeds back into
//! pipeline decisions.

use phpfold_syntax::Span;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Missing for whole-run diagnostics (convergence, inliner summary).
    pub span: Option<Span>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            span,
            message: message.into(),
        }
    }

    pub fn warning(span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            span,
            message: message.into(),
        }
    }

    pub fn note(span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Note,
            span,
            message: message.into(),
        }
    }
}

/// One pass's outcome inside one fixed-point round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub round: usize,
    pub pass: &'static str,
    pub changed: bool,
}

/// Sink for diagnostics and pass reports. Trait-based so the CLI and tests
/// can install different handlers.
pub trait DiagnosticHandler: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
    fn report_pass(&self, report: PassReport);

    fn error(&self, span: Option<Span>, message: &str) {
        self.report(Diagnostic::error(span, message));
    }

    fn warning(&self, span: Option<Span>, message: &str) {
        self.report(Diagnostic::warning(span, message));
    }

    fn note(&self, span: Option<Span>, message: &str) {
        self.report(Diagnostic::note(span, message));
    }

    fn has_errors(&self) -> bool;
    fn diagnostics(&self) -> Vec<Diagnostic>;
    fn pass_reports(&self) -> Vec<PassReport>;
}

/// Prints to stderr as diagnostics arrive, keeping a copy for inspection.
pub struct ConsoleDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
    reports: Mutex<Vec<PassReport>>,
    verbose_passes: bool,
}

impl ConsoleDiagnosticHandler {
    pub fn new(verbose_passes: bool) -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
            verbose_passes,
        }
    }
}

impl DiagnosticHandler for ConsoleDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        let level = match diagnostic.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Note => "note",
        };
        match diagnostic.span {
            Some(span) => eprintln!("{level} at {span}: {}", diagnostic.message),
            None => eprintln!("{level}: {}", diagnostic.message),
        }
        self.diagnostics.lock().unwrap().push(diagnostic);
    }

    fn report_pass(&self, report: PassReport) {
        if self.verbose_passes && report.changed {
            eprintln!("round {}: pass '{}' changed the tree", report.round, report.pass);
        }
        self.reports.lock().unwrap().push(report);
    }

    fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error)
    }

    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }

    fn pass_reports(&self) -> Vec<PassReport> {
        self.reports.lock().unwrap().clone()
    }
}

/// Collects silently; used in tests and by embedders that render reports
/// themselves.
#[derive(Default)]
pub struct CollectingDiagnosticHandler {
    diagnostics: Mutex<Vec<Diagnostic>>,
    reports: Mutex<Vec<PassReport>>,
}

impl CollectingDiagnosticHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticHandler for CollectingDiagnosticHandler {
    fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().unwrap().push(diagnostic);
    }

    fn report_pass(&self, report: PassReport) {
        self.reports.lock().unwrap().push(report);
    }

    fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.level == DiagnosticLevel::Error)
    }

    fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().unwrap().clone()
    }

    fn pass_reports(&self) -> Vec<PassReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_handler_counts() {
        let handler = CollectingDiagnosticHandler::new();
        handler.error(None, "bad");
        handler.warning(None, "meh");
        handler.note(Some(Span::new(0, 1, 1, 1)), "fyi");

        assert!(handler.has_errors());
        assert_eq!(handler.diagnostics().len(), 3);
    }

    #[test]
    fn test_pass_reports_recorded_in_order() {
        let handler = CollectingDiagnosticHandler::new();
        handler.report_pass(PassReport {
            round: 1,
            pass: "constant-folding",
            changed: true,
        });
        handler.report_pass(PassReport {
            round: 1,
            pass: "dead-code",
            changed: false,
        });
        let reports = handler.pass_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].pass, "constant-folding");
        assert!(!reports[1].changed);
    }
}
