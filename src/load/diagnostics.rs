//! Diagnostics: recoverable load problems.
//!
//! A load keeps going after every problem listed here. Each one is recorded
//! with the document position the reader was at and, when known, the node
//! and feature involved.

use std::fmt;
use std::sync::Arc;

use crate::base::{FeatureId, LineCol, NodeId};
use crate::meta::ValueError;

// ============================================================================
// DIAGNOSTIC TYPES
// ============================================================================

/// Severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
}

/// What went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// No package is registered (or loadable) for a namespace.
    PackageNotFound,
    /// A namespace's package has no such type, or the type is abstract.
    ClassNotFound,
    /// An element or attribute matches no feature of its object.
    FeatureNotFound,
    /// A value was rejected by the graph.
    IllegalValue,
    /// An identifier reference never resolved.
    UnresolvedReference,
    /// The metadata loader failed; the load continued without it.
    MetadataUnavailable,
}

impl DiagnosticKind {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::PackageNotFound => codes::PACKAGE_NOT_FOUND,
            DiagnosticKind::ClassNotFound => codes::CLASS_NOT_FOUND,
            DiagnosticKind::FeatureNotFound => codes::FEATURE_NOT_FOUND,
            DiagnosticKind::IllegalValue => codes::ILLEGAL_VALUE,
            DiagnosticKind::UnresolvedReference => codes::UNRESOLVED_REFERENCE,
            DiagnosticKind::MetadataUnavailable => codes::METADATA_UNAVAILABLE,
        }
    }
}

/// A diagnostic message with location.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: Arc<str>,
    /// Document the diagnostic belongs to (system id or URI).
    pub location: Option<Arc<str>>,
    pub position: LineCol,
    pub node: Option<NodeId>,
    pub feature: Option<FeatureId>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(kind: DiagnosticKind, position: LineCol, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            location: None,
            position,
            node: None,
            feature: None,
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(kind: DiagnosticKind, position: LineCol, message: impl Into<Arc<str>>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, position, message)
        }
    }

    pub fn with_location(mut self, location: Option<Arc<str>>) -> Self {
        self.location = location;
        self
    }

    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_feature(mut self, feature: FeatureId) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(location) = &self.location {
            write!(f, "{}:", location)?;
        }
        write!(f, "{}: {}[{}]: {}", self.position, level, self.code(), self.message)
    }
}

// ============================================================================
// DIAGNOSTIC CODES
// ============================================================================

/// Standard diagnostic codes for load problems.
pub mod codes {
    pub const PACKAGE_NOT_FOUND: &str = "E0101";
    pub const CLASS_NOT_FOUND: &str = "E0102";
    pub const FEATURE_NOT_FOUND: &str = "E0103";
    pub const ILLEGAL_VALUE: &str = "E0104";
    pub const UNRESOLVED_REFERENCE: &str = "E0105";

    /// Metadata loader failure.
    pub const METADATA_UNAVAILABLE: &str = "W0101";
}

// ============================================================================
// DIAGNOSTIC COLLECTOR
// ============================================================================

/// Collects diagnostics in the order they were raised.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
    location: Option<Arc<str>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location stamped onto every diagnostic added from now on.
    pub fn set_location(&mut self, location: Option<&str>) {
        self.location = location.map(Arc::from);
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        let diagnostic = match diagnostic.location {
            Some(_) => diagnostic,
            None => diagnostic.with_location(self.location.clone()),
        };
        self.diagnostics.push(diagnostic);
    }

    pub fn package_not_found(&mut self, ns: Option<&str>, position: LineCol) {
        self.add(Diagnostic::error(
            DiagnosticKind::PackageNotFound,
            position,
            format!("package with uri '{}' not found", ns.unwrap_or("")),
        ));
    }

    pub fn class_not_found(&mut self, name: &str, position: LineCol) {
        self.add(Diagnostic::error(
            DiagnosticKind::ClassNotFound,
            position,
            format!("class '{}' is not found or is abstract", name),
        ));
    }

    pub fn feature_not_found(&mut self, name: &str, node: Option<NodeId>, position: LineCol) {
        let mut diag = Diagnostic::error(
            DiagnosticKind::FeatureNotFound,
            position,
            format!("feature '{}' not found", name),
        );
        diag.node = node;
        self.add(diag);
    }

    pub fn illegal_value(&mut self, error: &ValueError, node: NodeId, feature: FeatureId, position: LineCol) {
        self.add(
            Diagnostic::error(DiagnosticKind::IllegalValue, position, error.to_string())
                .with_node(node)
                .with_feature(feature),
        );
    }

    pub fn unresolved_reference(&mut self, identifier: &str, node: NodeId, feature: FeatureId, position: LineCol) {
        self.add(
            Diagnostic::error(
                DiagnosticKind::UnresolvedReference,
                position,
                format!("unresolved reference '{}'", identifier),
            )
            .with_node(node)
            .with_feature(feature),
        );
    }

    pub fn metadata_unavailable(&mut self, message: impl Into<Arc<str>>, position: LineCol) {
        self.add(Diagnostic::warning(DiagnosticKind::MetadataUnavailable, position, message));
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Take all diagnostics, leaving the collector empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
        self.location = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_counts() {
        let mut c = DiagnosticCollector::new();
        c.package_not_found(Some("urn:x"), LineCol::new(0, 0));
        c.metadata_unavailable("loader offline", LineCol::UNKNOWN);

        assert_eq!(c.error_count(), 1);
        assert_eq!(c.warning_count(), 1);
        assert!(c.has_errors());
    }

    #[test]
    fn test_location_is_stamped() {
        let mut c = DiagnosticCollector::new();
        c.set_location(Some("file:///a.xml"));
        c.class_not_found("lib:Shelf", LineCol::new(1, 2));

        let diag = &c.diagnostics()[0];
        assert_eq!(diag.location.as_deref(), Some("file:///a.xml"));
        assert_eq!(diag.code(), "E0102");
        assert_eq!(
            diag.to_string(),
            "file:///a.xml:2:3: error[E0102]: class 'lib:Shelf' is not found or is abstract"
        );
    }

    #[test]
    fn test_take_empties() {
        let mut c = DiagnosticCollector::new();
        c.feature_not_found("bogus", None, LineCol::UNKNOWN);
        let taken = c.take();

        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].kind, DiagnosticKind::FeatureNotFound);
        assert!(c.is_empty());
    }
}
