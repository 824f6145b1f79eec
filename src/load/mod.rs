//! Streaming XML loading.
//!
//! ## Pipeline
//!
//! ```text
//! reader     → quick-xml tokens become XmlEvents with positions
//!   ↓
//! handler    → one Frame per element; builds the Resource
//!   ↓          ├─ cache      name → type/feature memo
//!   ↓          ├─ namespace  prefix scopes
//!   ↓          └─ stack      open element contexts
//! ledger     → forward identifier references, retried as targets appear
//!   ↓
//! reconcile  → same-document proxies swapped for their targets
//! ```
//!
//! Problems with individual elements never stop a load; they become
//! [`Diagnostic`]s on the [`LoadOutcome`]. Only malformed XML, I/O and
//! misuse of the handler are [`LoadError`]s.

mod cache;
mod diagnostics;
mod error;
mod events;
mod handler;
mod ledger;
mod namespace;
mod options;
mod reader;
mod reconcile;
mod stack;

pub use cache::{ResolutionCache, ResolveMode};
pub use diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Severity, codes};
pub use error::LoadError;
pub use events::{DocumentInfo, DocumentProlog, XmlAttribute, XmlEvent};
pub use handler::{HandlerState, LoadOutcome, XmlHandler};
pub use ledger::{
    ManyReference, PendingId, REFERENCE_THRESHOLD, ReferenceLedger, ResolveSummary, SingleReference,
};
pub use namespace::NamespaceScope;
pub use options::{FeaturePrecedence, LoadOptions, ReferenceStyle, UnknownFeaturePolicy};
pub use reader::{XmlLoader, load_bytes, load_file, load_str};
pub use reconcile::SameDocumentProxies;
pub use stack::{ElementStack, Frame, FrameKind, MixedTarget};
