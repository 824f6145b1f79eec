//! Metadata the loader resolves XML names against.
//!
//! - [`Metamodel`] - arena of packages, types and features
//! - [`TypeResolver`] - the lookup seam used by the resolution cache
//! - [`MetadataLoader`] - optional hook for packages not yet registered
//! - [`Value`], [`DataType`] - slot values and literal parsing

mod model;
mod resolver;
mod value;

pub use model::{
    Affiliation, FeatureDef, FeatureKind, Metamodel, NamespaceConstraint, Package, ProcessingKind,
    TypeDef, Wildcard, XML_TYPE_URI, XSI_URI, XmlKind, XmlTypes,
};
pub use resolver::{MetadataError, MetadataLoader, TypeResolver};
pub use value::{DataType, Value, ValueError};
