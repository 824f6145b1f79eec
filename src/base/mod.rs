//! Foundation types for the loader.
//!
//! - [`NodeId`], [`TypeId`], [`FeatureId`], [`PackageId`] - Arena handles
//! - [`LineCol`], [`LineIndex`] - Document positions
//!
//! This module has NO dependencies on other crate modules.

mod ids;
mod span;

pub use ids::{FeatureId, NodeId, PackageId, TypeId};
pub use span::{LineCol, LineIndex, TextSize};

// Re-export text-size types for convenience
pub use text_size;
