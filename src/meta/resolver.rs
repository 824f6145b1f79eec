//! Seams between the loader and whatever supplies metadata.

use thiserror::Error;

use super::model::{Affiliation, Metamodel};
use crate::base::{FeatureId, PackageId, TypeId};

/// Resolves XML names to types and features.
///
/// The loader only ever sees the schema through this trait. Implementations
/// report a [`generation`](TypeResolver::generation) that changes whenever
/// previously returned answers may have become wrong.
pub trait TypeResolver {
    fn resolve_type(&self, ns: Option<&str>, local: &str) -> Option<TypeId>;

    fn resolve_feature(
        &self,
        owner: TypeId,
        ns: Option<&str>,
        local: &str,
        is_element: bool,
    ) -> Option<FeatureId>;

    /// A global element/attribute declared for the namespace, if any.
    fn global_feature(&self, ns: Option<&str>, local: &str, is_element: bool) -> Option<FeatureId>;

    fn wildcard_affiliation(
        &self,
        owner: TypeId,
        ns: Option<&str>,
        local: &str,
        is_element: bool,
    ) -> Option<Affiliation>;

    /// Create (or return) an open feature for a name no metadata describes.
    fn demand_feature(&mut self, ns: Option<&str>, local: &str, is_element: bool) -> FeatureId;

    fn generation(&self) -> u64;
}

impl TypeResolver for Metamodel {
    fn resolve_type(&self, ns: Option<&str>, local: &str) -> Option<TypeId> {
        let package = self.package_for_namespace(ns)?;
        self.type_by_name(package, local)
    }

    fn resolve_feature(
        &self,
        owner: TypeId,
        ns: Option<&str>,
        local: &str,
        is_element: bool,
    ) -> Option<FeatureId> {
        self.declared_feature(owner, ns, local, is_element)
    }

    fn global_feature(&self, ns: Option<&str>, local: &str, is_element: bool) -> Option<FeatureId> {
        Metamodel::global_feature(self, ns, local, is_element)
    }

    fn wildcard_affiliation(
        &self,
        owner: TypeId,
        ns: Option<&str>,
        _local: &str,
        is_element: bool,
    ) -> Option<Affiliation> {
        Metamodel::wildcard_affiliation(self, owner, ns, is_element)
    }

    fn demand_feature(&mut self, ns: Option<&str>, local: &str, is_element: bool) -> FeatureId {
        Metamodel::demand_feature(self, ns, local, is_element)
    }

    fn generation(&self) -> u64 {
        Metamodel::generation(self)
    }
}

/// Failure reported by a [`MetadataLoader`]. Never fatal to a load.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("could not load metadata from '{uri}': {reason}")]
pub struct MetadataError {
    pub uri: String,
    pub reason: String,
}

impl MetadataError {
    pub fn new(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Optional source of packages the metamodel does not know yet.
///
/// Both hooks are synchronous and may register packages in `meta`.
pub trait MetadataLoader {
    /// Load the package for a namespace URI. `Ok(None)` means "not mine".
    fn load_package(&mut self, meta: &mut Metamodel, ns_uri: &str) -> Result<Option<PackageId>, MetadataError> {
        let _ = (meta, ns_uri);
        Ok(None)
    }

    /// Load packages from `(namespace, location)` pairs named by
    /// `xsi:schemaLocation` / `xsi:noNamespaceSchemaLocation`.
    fn load_schemas(&mut self, meta: &mut Metamodel, locations: &[(Option<String>, String)]) -> Result<(), MetadataError> {
        let _ = (meta, locations);
        Ok(())
    }
}
