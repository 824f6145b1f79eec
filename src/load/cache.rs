//! Type/feature resolution cache.
//!
//! Memoizes name lookups per document, including misses. Entries belong to
//! one resolver generation and are dropped as soon as the resolver reports
//! a different one (for example after a feature was demand-created).

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use super::options::FeaturePrecedence;
use crate::base::{FeatureId, TypeId};
use crate::meta::{ProcessingKind, TypeResolver};

type FeatureKey = (TypeId, Option<SmolStr>, SmolStr, bool);
type TypeKey = (Option<SmolStr>, SmolStr);

/// How feature resolution is performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolveMode {
    /// Consult wildcards (and demand features for lax content).
    pub extended_metadata: bool,
    pub precedence: FeaturePrecedence,
}

#[derive(Debug, Default)]
pub struct ResolutionCache {
    generation: Option<u64>,
    features: FxHashMap<FeatureKey, Option<FeatureId>>,
    types: FxHashMap<TypeKey, Option<TypeId>>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn sync<R: TypeResolver + ?Sized>(&mut self, resolver: &R) {
        let generation = resolver.generation();
        if self.generation != Some(generation) {
            if self.generation.is_some() {
                tracing::trace!(generation, "resolution cache invalidated");
            }
            self.features.clear();
            self.types.clear();
            self.generation = Some(generation);
        }
    }

    /// Type named `(ns, local)`.
    pub fn type_of<R: TypeResolver + ?Sized>(
        &mut self,
        resolver: &R,
        ns: Option<&str>,
        local: &str,
    ) -> Option<TypeId> {
        self.sync(resolver);
        let key = (ns.map(SmolStr::new), SmolStr::new(local));
        *self
            .types
            .entry(key)
            .or_insert_with(|| resolver.resolve_type(ns, local))
    }

    /// Feature of `owner` matching the XML name `(ns, local)`.
    ///
    /// Declared features are tried first, then (with extended metadata) the
    /// owner's wildcards; [`FeaturePrecedence::WildcardFirst`] swaps the two.
    /// A strict wildcard only admits global features that already exist; lax
    /// and skip wildcards demand one.
    pub fn feature<R: TypeResolver + ?Sized>(
        &mut self,
        resolver: &mut R,
        owner: TypeId,
        ns: Option<&str>,
        local: &str,
        is_element: bool,
        mode: ResolveMode,
    ) -> Option<FeatureId> {
        self.sync(resolver);
        let key = (owner, ns.map(SmolStr::new), SmolStr::new(local), is_element);
        if let Some(&cached) = self.features.get(&key) {
            return cached;
        }

        let resolved = match mode.precedence {
            FeaturePrecedence::DeclaredFirst => resolver
                .resolve_feature(owner, ns, local, is_element)
                .or_else(|| Self::through_wildcard(resolver, owner, ns, local, is_element, mode)),
            FeaturePrecedence::WildcardFirst => {
                Self::through_wildcard(resolver, owner, ns, local, is_element, mode)
                    .or_else(|| resolver.resolve_feature(owner, ns, local, is_element))
            }
        };

        // Demanding a feature moves the resolver to a new generation.
        self.sync(resolver);
        self.features.insert(key, resolved);
        resolved
    }

    fn through_wildcard<R: TypeResolver + ?Sized>(
        resolver: &mut R,
        owner: TypeId,
        ns: Option<&str>,
        local: &str,
        is_element: bool,
        mode: ResolveMode,
    ) -> Option<FeatureId> {
        if !mode.extended_metadata {
            return None;
        }
        let affiliation = resolver.wildcard_affiliation(owner, ns, local, is_element)?;
        let global = resolver.global_feature(ns, local, is_element);
        match affiliation.processing {
            ProcessingKind::Strict => global,
            ProcessingKind::Lax | ProcessingKind::Skip => {
                global.or_else(|| Some(resolver.demand_feature(ns, local, is_element)))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.features.len() + self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.features.clear();
        self.types.clear();
        self.generation = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{Affiliation, DataType, Metamodel, NamespaceConstraint};
    use std::cell::Cell;

    const LAX: ResolveMode = ResolveMode {
        extended_metadata: true,
        precedence: FeaturePrecedence::DeclaredFirst,
    };
    const BASIC: ResolveMode = ResolveMode {
        extended_metadata: false,
        precedence: FeaturePrecedence::DeclaredFirst,
    };

    /// Resolver that counts lookups and answers every name with one feature.
    struct Counting {
        calls: Cell<usize>,
        generation: u64,
        answer: Option<FeatureId>,
    }

    impl TypeResolver for Counting {
        fn resolve_type(&self, _: Option<&str>, _: &str) -> Option<TypeId> {
            self.calls.set(self.calls.get() + 1);
            None
        }
        fn resolve_feature(&self, _: TypeId, _: Option<&str>, _: &str, _: bool) -> Option<FeatureId> {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
        fn global_feature(&self, _: Option<&str>, _: &str, _: bool) -> Option<FeatureId> {
            None
        }
        fn wildcard_affiliation(&self, _: TypeId, _: Option<&str>, _: &str, _: bool) -> Option<Affiliation> {
            None
        }
        fn demand_feature(&mut self, _: Option<&str>, _: &str, _: bool) -> FeatureId {
            self.generation += 1;
            FeatureId::new(99)
        }
        fn generation(&self) -> u64 {
            self.generation
        }
    }

    #[test]
    fn test_misses_are_memoized() {
        let mut resolver = Counting {
            calls: Cell::new(0),
            generation: 0,
            answer: None,
        };
        let mut cache = ResolutionCache::new();
        let owner = TypeId::new(0);

        assert_eq!(cache.feature(&mut resolver, owner, None, "x", true, BASIC), None);
        assert_eq!(cache.feature(&mut resolver, owner, None, "x", true, BASIC), None);
        assert_eq!(resolver.calls.get(), 1);

        // Element and attribute lookups are distinct keys.
        cache.feature(&mut resolver, owner, None, "x", false, BASIC);
        assert_eq!(resolver.calls.get(), 2);
    }

    #[test]
    fn test_generation_change_invalidates() {
        let mut resolver = Counting {
            calls: Cell::new(0),
            generation: 0,
            answer: Some(FeatureId::new(4)),
        };
        let mut cache = ResolutionCache::new();
        let owner = TypeId::new(0);

        cache.feature(&mut resolver, owner, None, "x", true, BASIC);
        resolver.generation = 7;
        cache.feature(&mut resolver, owner, None, "x", true, BASIC);
        assert_eq!(resolver.calls.get(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lax_wildcard_demands_feature() {
        let mut meta = Metamodel::new();
        let any = meta.xml().any_type;
        let mut cache = ResolutionCache::new();

        let first = cache.feature(&mut meta, any, Some("urn:x"), "note", true, LAX);
        let again = cache.feature(&mut meta, any, Some("urn:x"), "note", true, LAX);
        assert!(first.is_some());
        assert_eq!(first, again);

        let basic = cache.feature(&mut meta, any, Some("urn:x"), "other", true, BASIC);
        assert_eq!(basic, None);
    }

    #[test]
    fn test_strict_wildcard_needs_global_feature() {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("urn:doc", "doc");
        let holder_type = meta.add_type(pkg, "Holder", &[]);
        let holder = meta.set_mixed(holder_type);
        meta.set_element_wildcard(
            holder_type,
            holder,
            NamespaceConstraint::Any,
            crate::meta::ProcessingKind::Strict,
        );
        let root = meta.set_document_root(pkg);
        let global = meta.add_attribute(root, "known", DataType::String);

        let mut cache = ResolutionCache::new();
        let found = cache.feature(&mut meta, holder_type, Some("urn:doc"), "known", true, LAX);
        let missing = cache.feature(&mut meta, holder_type, Some("urn:doc"), "unknown", true, LAX);
        assert_eq!(found, Some(global));
        assert_eq!(missing, None);
    }

    #[test]
    fn test_wildcard_first_precedence() {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("urn:doc", "doc");
        let ty = meta.add_type(pkg, "Open", &[]);
        let declared = meta.add_attribute(ty, "label", DataType::String);
        let holder = meta.add_feature_map(ty, "any");
        meta.set_element_wildcard(ty, holder, NamespaceConstraint::Any, ProcessingKind::Lax);

        let mut cache = ResolutionCache::new();
        let declared_first = cache.feature(&mut meta, ty, Some("urn:doc"), "label", true, LAX);
        assert_eq!(declared_first, Some(declared));

        let wildcard_first = ResolveMode {
            precedence: FeaturePrecedence::WildcardFirst,
            ..LAX
        };
        let mut cache = ResolutionCache::new();
        let chosen = cache.feature(&mut meta, ty, Some("urn:doc"), "label", true, wildcard_first);
        assert!(chosen.is_some());
        assert_ne!(chosen, Some(declared));
    }

    #[test]
    fn test_type_lookup_is_cached() {
        let resolver = Counting {
            calls: Cell::new(0),
            generation: 0,
            answer: None,
        };
        let mut cache = ResolutionCache::new();
        cache.type_of(&resolver, Some("urn:a"), "T");
        cache.type_of(&resolver, Some("urn:a"), "T");
        assert_eq!(resolver.calls.get(), 1);
    }
}
