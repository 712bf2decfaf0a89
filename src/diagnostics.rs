//! Diagnostic collection and reporting for the shrinking pipeline.
//!
//! Tracing errors inside one method never abort a reachability round; they are
//! recorded against the method's context through the [`Reporter`] and surfaced
//! after the round ends. Rule-engine errors are likewise collected and reported
//! together so the user sees all of them at once. Fatal errors are raised only
//! at stage boundaries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use strum::Display;

/// Where a definition or rule came from, for pinpointing diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    /// No origin information available.
    Unknown,
    /// A filesystem path (archive, rule file, loose class file).
    Path(Arc<PathBuf>),
    /// An in-memory input identified by a caller-supplied label.
    Memory(Arc<str>),
    /// A class synthesized by the compiler from a context inside `parent`.
    Synthetic(Arc<Origin>),
    /// Rule text supplied inline rather than via a file.
    InlineRule,
}

impl Origin {
    /// Origin for a filesystem path.
    pub fn path<P: AsRef<Path>>(path: P) -> Self {
        Origin::Path(Arc::new(path.as_ref().to_path_buf()))
    }

    /// Origin for an in-memory buffer with a descriptive label.
    pub fn memory(label: &str) -> Self {
        Origin::Memory(Arc::from(label))
    }

    /// Origin for an item synthesized from this one.
    #[must_use]
    pub fn synthetic(&self) -> Self {
        Origin::Synthetic(Arc::new(self.clone()))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Unknown => write!(f, "<unknown>"),
            Origin::Path(path) => write!(f, "{}", path.display()),
            Origin::Memory(label) => write!(f, "<memory:{label}>"),
            Origin::Synthetic(parent) => write!(f, "<synthesized from {parent}>"),
            Origin::InlineRule => write!(f, "<inline rules>"),
        }
    }
}

/// Diagnostic severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    /// Informational message.
    Info,
    /// A problem the compilation can proceed past.
    Warning,
    /// A fatal problem; the compilation fails at the next stage boundary.
    Error,
}

/// What kind of problem a diagnostic describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosticKind {
    /// Malformed definition or data entry.
    InvalidInput,
    /// Unparsable or conflicting rule.
    InvalidRule,
    /// A traced reference with no definition.
    MissingClass,
    /// A structural resolution failure found during tracing.
    ResolutionFailure,
    /// A `-checkdiscard` target survived shrinking.
    CheckDiscardFailed,
    /// Anything else worth telling the user about.
    Other,
}

/// A single collected diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// How severe the problem is.
    pub severity: Severity,
    /// What kind of problem it is.
    pub kind: DiagnosticKind,
    /// The input the problem was found in.
    pub origin: Origin,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}): {}",
            self.severity, self.kind, self.origin, self.message
        )
    }
}

/// Thread-safe diagnostic sink shared across pipeline stages.
///
/// Worker threads report through a shared reference during parallel tracing;
/// the driver drains and sorts the collected diagnostics at stage boundaries.
#[derive(Debug, Default, Clone)]
pub struct Reporter {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl Reporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic.
    pub fn report(&self, diagnostic: Diagnostic) {
        if let Ok(mut diagnostics) = self.diagnostics.lock() {
            diagnostics.push(diagnostic);
        }
    }

    /// Records a warning with the given kind and origin.
    pub fn warning(&self, kind: DiagnosticKind, origin: Origin, message: impl Into<String>) {
        self.report(Diagnostic {
            severity: Severity::Warning,
            kind,
            origin,
            message: message.into(),
        });
    }

    /// Records a fatal error with the given kind and origin.
    pub fn error(&self, kind: DiagnosticKind, origin: Origin, message: impl Into<String>) {
        self.report(Diagnostic {
            severity: Severity::Error,
            kind,
            origin,
            message: message.into(),
        });
    }

    /// Whether at least one fatal diagnostic has been recorded.
    ///
    /// Drives the nonzero exit status contract of the driver.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .lock()
            .map(|diagnostics| {
                diagnostics
                    .iter()
                    .any(|diagnostic| diagnostic.severity == Severity::Error)
            })
            .unwrap_or(false)
    }

    /// All diagnostics recorded so far, sorted by severity (most severe
    /// first), then by origin.
    #[must_use]
    pub fn sorted(&self) -> Vec<Diagnostic> {
        let mut all = self
            .diagnostics
            .lock()
            .map(|diagnostics| diagnostics.clone())
            .unwrap_or_default();
        all.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.origin.cmp(&b.origin))
                .then_with(|| a.message.cmp(&b.message))
        });
        all
    }

    /// Number of recorded diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.diagnostics
            .lock()
            .map(|diagnostics| diagnostics.len())
            .unwrap_or(0)
    }

    /// Whether nothing has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_puts_errors_first() {
        let reporter = Reporter::new();
        reporter.warning(DiagnosticKind::MissingClass, Origin::Unknown, "late warning");
        reporter.error(DiagnosticKind::InvalidRule, Origin::InlineRule, "fatal");
        reporter.warning(DiagnosticKind::Other, Origin::Unknown, "another warning");

        let sorted = reporter.sorted();
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted[0].severity, Severity::Error);
        assert!(reporter.has_errors());
    }

    #[test]
    fn origin_display() {
        assert_eq!(Origin::memory("app").to_string(), "<memory:app>");
        let synthetic = Origin::memory("app").synthetic();
        assert_eq!(synthetic.to_string(), "<synthesized from <memory:app>>");
    }
}
