//! # syster-xmi
//!
//! Streaming XML/XMI loader that builds object graphs from metamodel-driven
//! documents.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! load    → Event driver, reference ledger, proxy reconciliation
//!   ↓
//! graph   → Resource, nodes, and the factory/setter/index seams
//!   ↓
//! meta    → Packages, types, features, literal parsing
//!   ↓
//! base    → Primitives (arena ids, LineCol, LineIndex)
//! ```
//!
//! ## Example
//!
//! ```
//! use xmi::load::{load_str, LoadOptions};
//! use xmi::meta::{DataType, Metamodel};
//!
//! let mut meta = Metamodel::new();
//! let pkg = meta.add_package("", "t");
//! let root = meta.add_type(pkg, "root", &[]);
//! let item = meta.add_attribute(root, "item", DataType::String);
//!
//! let outcome = load_str(&mut meta, "<root><item>ok</item></root>", LoadOptions::default()).unwrap();
//! let node = outcome.resource.contents()[0];
//! assert_eq!(outcome.resource.get(node, item)[0].as_str(), Some("ok"));
//! assert!(outcome.diagnostics.is_empty());
//! ```

// ============================================================================
// FOUNDATION
// ============================================================================

/// Foundation types: arena ids, positions
pub mod base;

/// Metamodel: packages, types, features, values
pub mod meta;

// ============================================================================
// LOADING
// ============================================================================

/// Object graph the loader populates
pub mod graph;

/// Streaming XML loader
pub mod load;

// Re-export commonly needed items
pub use base::{FeatureId, LineCol, LineIndex, NodeId, PackageId, TypeId};
pub use graph::Resource;
pub use load::{Diagnostic, DiagnosticKind, LoadError, LoadOptions, LoadOutcome, XmlLoader};
pub use meta::Metamodel;
