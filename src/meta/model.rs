//! In-memory metamodel: packages, types and structural features.
//!
//! The metamodel is an arena. Every mutation bumps [`Metamodel::generation`]
//! so that caches built over it can tell when they are stale.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use super::value::{DataType, Value, ValueError};
use crate::base::{FeatureId, PackageId, TypeId};

/// Namespace of the built-in XML type package.
pub const XML_TYPE_URI: &str = "http://www.w3.org/2001/XMLSchema";
/// Namespace of `xsi:type`, `xsi:nil` and the schema-location attributes.
pub const XSI_URI: &str = "http://www.w3.org/2001/XMLSchema-instance";

// ============================================================================
// DEFINITIONS
// ============================================================================

/// What a feature holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureKind {
    /// Data values parsed from text.
    Attribute(DataType),
    /// Links to other nodes.
    Reference {
        target: TypeId,
        containment: bool,
        resolve_proxies: bool,
    },
    /// Ordered `(feature, value)` entries: mixed text, wildcard content.
    FeatureMap,
}

/// How a feature is serialized in XML.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum XmlKind {
    /// Accepted both as an element and as an attribute.
    #[default]
    Unspecified,
    Element,
    Attribute,
}

#[derive(Clone, Debug)]
pub struct FeatureDef {
    pub name: SmolStr,
    /// Explicit namespace. `None` means "the owner's namespace, or unqualified".
    pub namespace: Option<SmolStr>,
    pub owner: TypeId,
    pub kind: FeatureKind,
    pub many: bool,
    pub opposite: Option<FeatureId>,
    pub xml_kind: XmlKind,
    pub transient: bool,
    pub is_id: bool,
}

impl FeatureDef {
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { .. })
    }

    pub fn is_containment(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { containment: true, .. })
    }

    pub fn reference_target(&self) -> Option<TypeId> {
        match self.kind {
            FeatureKind::Reference { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self.kind {
            FeatureKind::Attribute(data_type) => Some(data_type),
            _ => None,
        }
    }

    fn matches_xml_kind(&self, is_element: bool) -> bool {
        if matches!(self.kind, FeatureKind::FeatureMap) {
            return false;
        }
        match self.xml_kind {
            XmlKind::Unspecified => true,
            XmlKind::Element => is_element,
            XmlKind::Attribute => !is_element,
        }
    }
}

/// Namespaces a wildcard admits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceConstraint {
    /// `##any`
    Any,
    /// `##other`: any qualified namespace except the owner's.
    Other,
    /// An explicit list; `None` stands for unqualified names.
    Only(Vec<Option<SmolStr>>),
}

impl NamespaceConstraint {
    pub fn admits(&self, target: &str, ns: Option<&str>) -> bool {
        match self {
            NamespaceConstraint::Any => true,
            NamespaceConstraint::Other => ns.is_some_and(|ns| ns != target),
            NamespaceConstraint::Only(list) => list.iter().any(|entry| entry.as_deref() == ns),
        }
    }
}

/// How strictly wildcard content is matched against known metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingKind {
    Strict,
    Lax,
    Skip,
}

#[derive(Clone, Debug)]
pub struct Wildcard {
    /// Feature-map feature that stores matched content.
    pub holder: FeatureId,
    pub namespaces: NamespaceConstraint,
    pub processing: ProcessingKind,
}

/// The wildcard a name was matched against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Affiliation {
    pub holder: FeatureId,
    pub processing: ProcessingKind,
}

#[derive(Clone, Debug)]
pub struct TypeDef {
    pub name: SmolStr,
    pub package: PackageId,
    pub supertypes: Vec<TypeId>,
    pub features: Vec<FeatureId>,
    pub is_abstract: bool,
    /// Feature map receiving interleaved text, comments and elements.
    pub mixed: Option<FeatureId>,
    /// Feature receiving the text of a simple-content element.
    pub simple: Option<FeatureId>,
    pub element_wildcard: Option<Wildcard>,
    pub attribute_wildcard: Option<Wildcard>,
}

#[derive(Clone, Debug)]
pub struct Package {
    pub ns_uri: SmolStr,
    pub prefix: SmolStr,
    pub types: IndexMap<SmolStr, TypeId>,
    /// Type whose features are the package's global elements and attributes.
    pub document_root: Option<TypeId>,
    /// Created on demand for a namespace with no registered metadata.
    pub demanded: bool,
}

/// Handles to the intrinsic XML type package.
#[derive(Clone, Copy, Debug)]
pub struct XmlTypes {
    pub package: PackageId,
    /// Open content type used for anything without metadata.
    pub any_type: TypeId,
    pub mixed: FeatureId,
    pub any_attribute: FeatureId,
    /// Key of text entries in mixed feature maps.
    pub text: FeatureId,
    /// Key of CDATA entries in mixed feature maps.
    pub cdata: FeatureId,
    /// Key of comment entries in mixed feature maps.
    pub comment: FeatureId,
    /// Key of processing-instruction entries in mixed feature maps.
    pub processing_instruction: FeatureId,
}

// ============================================================================
// METAMODEL
// ============================================================================

#[derive(Clone, Debug)]
pub struct Metamodel {
    packages: Vec<Package>,
    types: Vec<TypeDef>,
    features: Vec<FeatureDef>,
    by_uri: FxHashMap<SmolStr, PackageId>,
    generation: u64,
    xml: XmlTypes,
}

impl Default for Metamodel {
    fn default() -> Self {
        Self::new()
    }
}

impl Metamodel {
    /// Create a metamodel holding only the XML type package.
    pub fn new() -> Self {
        let placeholder = XmlTypes {
            package: PackageId::new(0),
            any_type: TypeId::new(0),
            mixed: FeatureId::new(0),
            any_attribute: FeatureId::new(0),
            text: FeatureId::new(0),
            cdata: FeatureId::new(0),
            comment: FeatureId::new(0),
            processing_instruction: FeatureId::new(0),
        };
        let mut meta = Self {
            packages: Vec::new(),
            types: Vec::new(),
            features: Vec::new(),
            by_uri: FxHashMap::default(),
            generation: 0,
            xml: placeholder,
        };

        let package = meta.add_package(XML_TYPE_URI, "xsd");
        let any_type = meta.add_type(package, "anyType", &[]);
        let mixed = meta.set_mixed(any_type);
        meta.set_element_wildcard(any_type, mixed, NamespaceConstraint::Any, ProcessingKind::Lax);
        let any_attribute = meta.add_feature_map(any_type, "anyAttribute");
        meta.set_attribute_wildcard(any_type, any_attribute, NamespaceConstraint::Any, ProcessingKind::Lax);

        let root = meta.set_document_root(package);
        let entry_key = |meta: &mut Self, name: &str| {
            let feature = meta.add_attribute(root, name, DataType::String);
            let def = meta.feature_mut(feature);
            def.many = true;
            def.transient = true;
            feature
        };
        let text = entry_key(&mut meta, "text");
        let cdata = entry_key(&mut meta, "cdata");
        let comment = entry_key(&mut meta, "comment");
        let processing_instruction = entry_key(&mut meta, "processingInstruction");

        meta.xml = XmlTypes {
            package,
            any_type,
            mixed,
            any_attribute,
            text,
            cdata,
            comment,
            processing_instruction,
        };
        meta
    }

    /// Monotonic counter bumped by every mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn xml(&self) -> &XmlTypes {
        &self.xml
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Register a package, or return the one already registered for `ns_uri`.
    pub fn add_package(&mut self, ns_uri: &str, prefix: &str) -> PackageId {
        if let Some(&id) = self.by_uri.get(ns_uri) {
            return id;
        }
        self.generation += 1;
        let id = PackageId::new(self.packages.len() as u32);
        self.packages.push(Package {
            ns_uri: SmolStr::new(ns_uri),
            prefix: SmolStr::new(prefix),
            types: IndexMap::new(),
            document_root: None,
            demanded: false,
        });
        self.by_uri.insert(SmolStr::new(ns_uri), id);
        id
    }

    pub fn add_type(&mut self, package: PackageId, name: &str, supertypes: &[TypeId]) -> TypeId {
        self.generation += 1;
        let id = TypeId::new(self.types.len() as u32);
        self.types.push(TypeDef {
            name: SmolStr::new(name),
            package,
            supertypes: supertypes.to_vec(),
            features: Vec::new(),
            is_abstract: false,
            mixed: None,
            simple: None,
            element_wildcard: None,
            attribute_wildcard: None,
        });
        self.packages[package.slot()].types.insert(SmolStr::new(name), id);
        id
    }

    pub fn set_abstract(&mut self, ty: TypeId, is_abstract: bool) {
        self.generation += 1;
        self.types[ty.slot()].is_abstract = is_abstract;
    }

    fn push_feature(&mut self, owner: TypeId, name: &str, kind: FeatureKind) -> FeatureId {
        self.generation += 1;
        let id = FeatureId::new(self.features.len() as u32);
        self.features.push(FeatureDef {
            name: SmolStr::new(name),
            namespace: None,
            owner,
            kind,
            many: false,
            opposite: None,
            xml_kind: XmlKind::Unspecified,
            transient: false,
            is_id: false,
        });
        self.types[owner.slot()].features.push(id);
        id
    }

    pub fn add_attribute(&mut self, owner: TypeId, name: &str, data_type: DataType) -> FeatureId {
        self.push_feature(owner, name, FeatureKind::Attribute(data_type))
    }

    pub fn add_reference(
        &mut self,
        owner: TypeId,
        name: &str,
        target: TypeId,
        containment: bool,
    ) -> FeatureId {
        self.push_feature(
            owner,
            name,
            FeatureKind::Reference {
                target,
                containment,
                resolve_proxies: !containment,
            },
        )
    }

    pub fn add_feature_map(&mut self, owner: TypeId, name: &str) -> FeatureId {
        let feature = self.push_feature(owner, name, FeatureKind::FeatureMap);
        self.features[feature.slot()].many = true;
        feature
    }

    /// Mutable access to a feature definition. Counts as a mutation.
    pub fn feature_mut(&mut self, feature: FeatureId) -> &mut FeatureDef {
        self.generation += 1;
        &mut self.features[feature.slot()]
    }

    /// Make two references each other's opposite.
    pub fn set_opposites(&mut self, a: FeatureId, b: FeatureId) {
        self.generation += 1;
        self.features[a.slot()].opposite = Some(b);
        self.features[b.slot()].opposite = Some(a);
    }

    /// Give `ty` a mixed feature map, creating it if needed.
    pub fn set_mixed(&mut self, ty: TypeId) -> FeatureId {
        if let Some(mixed) = self.types[ty.slot()].mixed {
            return mixed;
        }
        let mixed = self.add_feature_map(ty, "mixed");
        self.types[ty.slot()].mixed = Some(mixed);
        mixed
    }

    /// Declare `feature` as the holder of `ty`'s simple (text) content.
    pub fn set_simple_content(&mut self, ty: TypeId, feature: FeatureId) {
        self.generation += 1;
        self.types[ty.slot()].simple = Some(feature);
    }

    pub fn set_element_wildcard(
        &mut self,
        ty: TypeId,
        holder: FeatureId,
        namespaces: NamespaceConstraint,
        processing: ProcessingKind,
    ) {
        self.generation += 1;
        self.types[ty.slot()].element_wildcard = Some(Wildcard {
            holder,
            namespaces,
            processing,
        });
    }

    pub fn set_attribute_wildcard(
        &mut self,
        ty: TypeId,
        holder: FeatureId,
        namespaces: NamespaceConstraint,
        processing: ProcessingKind,
    ) {
        self.generation += 1;
        self.types[ty.slot()].attribute_wildcard = Some(Wildcard {
            holder,
            namespaces,
            processing,
        });
    }

    /// Create the package's document-root type: a mixed type whose features
    /// are the package's global elements.
    pub fn set_document_root(&mut self, package: PackageId) -> TypeId {
        if let Some(root) = self.packages[package.slot()].document_root {
            return root;
        }
        let root = self.add_type(package, "DocumentRoot", &[]);
        self.set_mixed(root);
        self.packages[package.slot()].document_root = Some(root);
        root
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.slot()]
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.slot()]
    }

    pub fn feature(&self, id: FeatureId) -> &FeatureDef {
        &self.features[id.slot()]
    }

    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages
            .iter()
            .enumerate()
            .map(|(i, p)| (PackageId::new(i as u32), p))
    }

    /// Package registered for a namespace; `None` maps to the no-namespace package.
    pub fn package_for_namespace(&self, ns: Option<&str>) -> Option<PackageId> {
        self.by_uri.get(ns.unwrap_or("")).copied()
    }

    pub fn type_by_name(&self, package: PackageId, name: &str) -> Option<TypeId> {
        self.packages[package.slot()].types.get(name).copied()
    }

    /// `prefix:Name` for messages.
    pub fn qualified_name(&self, ty: TypeId) -> String {
        let def = self.type_def(ty);
        let prefix = &self.package(def.package).prefix;
        if prefix.is_empty() {
            def.name.to_string()
        } else {
            format!("{}:{}", prefix, def.name)
        }
    }

    /// Features of `ty` and all its supertypes, supertypes first.
    pub fn all_features(&self, ty: TypeId) -> Vec<FeatureId> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        self.collect_features(ty, &mut seen, &mut out);
        out
    }

    fn collect_features(&self, ty: TypeId, seen: &mut FxHashSet<TypeId>, out: &mut Vec<FeatureId>) {
        if !seen.insert(ty) {
            return;
        }
        let def = self.type_def(ty);
        for &sup in &def.supertypes {
            self.collect_features(sup, seen, out);
        }
        out.extend_from_slice(&def.features);
    }

    /// Whether instances of `ty` declare `feature` (directly or inherited).
    pub fn has_feature(&self, ty: TypeId, feature: FeatureId) -> bool {
        self.extends(ty, self.feature(feature).owner)
    }

    /// Conformance for values: every type conforms to `anyType`.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        sup == self.xml.any_type || self.extends(sub, sup)
    }

    fn extends(&self, sub: TypeId, sup: TypeId) -> bool {
        sub == sup
            || self
                .type_def(sub)
                .supertypes
                .iter()
                .any(|&parent| self.extends(parent, sup))
    }

    /// Feature of `ty` whose XML name is `(ns, local)`.
    pub fn declared_feature(
        &self,
        ty: TypeId,
        ns: Option<&str>,
        local: &str,
        is_element: bool,
    ) -> Option<FeatureId> {
        self.all_features(ty).into_iter().find(|&id| {
            let def = self.feature(id);
            if def.name != local || !def.matches_xml_kind(is_element) {
                return false;
            }
            match &def.namespace {
                Some(explicit) => Some(explicit.as_str()) == ns,
                None => match ns {
                    None => true,
                    Some(ns) => {
                        let owner_package = self.type_def(def.owner).package;
                        self.package(owner_package).ns_uri == ns
                    }
                },
            }
        })
    }

    /// Global element or attribute declared on the namespace's document root.
    pub fn global_feature(&self, ns: Option<&str>, local: &str, is_element: bool) -> Option<FeatureId> {
        let package = self.package_for_namespace(ns)?;
        let root = self.package(package).document_root?;
        self.declared_feature(root, ns, local, is_element)
    }

    /// Wildcard of `ty` (or a supertype) admitting `(ns, local)`.
    pub fn wildcard_affiliation(&self, ty: TypeId, ns: Option<&str>, is_element: bool) -> Option<Affiliation> {
        let mut pending = vec![ty];
        let mut seen = FxHashSet::default();
        while let Some(current) = pending.pop() {
            if !seen.insert(current) {
                continue;
            }
            let def = self.type_def(current);
            let wildcard = if is_element {
                def.element_wildcard.as_ref()
            } else {
                def.attribute_wildcard.as_ref()
            };
            if let Some(wildcard) = wildcard {
                let target = &self.package(def.package).ns_uri;
                if wildcard.namespaces.admits(target, ns) {
                    return Some(Affiliation {
                        holder: wildcard.holder,
                        processing: wildcard.processing,
                    });
                }
            }
            pending.extend(def.supertypes.iter().rev().copied());
        }
        None
    }

    /// Feature-map holder that would store `feature` on an instance of `ty`
    /// that does not declare it.
    pub fn wildcard_holder(&self, ty: TypeId, feature: FeatureId) -> Option<FeatureId> {
        let def = self.feature(feature);
        let ns = def
            .namespace
            .clone()
            .or_else(|| Some(self.package(self.type_def(def.owner).package).ns_uri.clone()))
            .filter(|ns| !ns.is_empty());
        let is_element = def.xml_kind != XmlKind::Attribute;
        self.wildcard_affiliation(ty, ns.as_deref(), is_element)
            .map(|affiliation| affiliation.holder)
    }

    /// Convert element or attribute text into a value for `feature`.
    pub fn parse_literal(&self, feature: FeatureId, literal: &str) -> Result<Value, ValueError> {
        let def = self.feature(feature);
        match def.kind {
            FeatureKind::Attribute(data_type) => data_type.parse(literal),
            _ => Err(ValueError::NotDataValued {
                feature: def.name.clone(),
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Demand-created metadata
    // ------------------------------------------------------------------------

    /// Package for `ns`, created with an open document root if missing.
    pub fn demand_package(&mut self, ns: Option<&str>) -> PackageId {
        if let Some(id) = self.package_for_namespace(ns) {
            return id;
        }
        let uri = ns.unwrap_or("");
        let prefix = demand_prefix(uri);
        let package = self.add_package(uri, &prefix);
        self.packages[package.slot()].demanded = true;

        let root = self.set_document_root(package);
        let mixed = self.set_mixed(root);
        self.set_element_wildcard(root, mixed, NamespaceConstraint::Any, ProcessingKind::Lax);
        let any_attribute = self.add_feature_map(root, "anyAttribute");
        self.set_attribute_wildcard(root, any_attribute, NamespaceConstraint::Any, ProcessingKind::Lax);
        package
    }

    /// Type `name` in `package`, created as an open subtype of `anyType` if missing.
    pub fn demand_type(&mut self, package: PackageId, name: &str) -> TypeId {
        if let Some(ty) = self.type_by_name(package, name) {
            return ty;
        }
        let any_type = self.xml.any_type;
        self.add_type(package, name, &[any_type])
    }

    /// Global feature for `(ns, local)`, created on the namespace's
    /// document root if missing. Elements become many-valued containments of
    /// `anyType`; attributes become strings.
    pub fn demand_feature(&mut self, ns: Option<&str>, local: &str, is_element: bool) -> FeatureId {
        let package = self.demand_package(ns);
        let root = self.set_document_root(package);
        if let Some(existing) = self.declared_feature(root, ns, local, is_element) {
            return existing;
        }
        let feature = if is_element {
            let any_type = self.xml.any_type;
            let feature = self.add_reference(root, local, any_type, true);
            self.features[feature.slot()].many = true;
            self.features[feature.slot()].xml_kind = XmlKind::Element;
            feature
        } else {
            let feature = self.add_attribute(root, local, DataType::String);
            self.features[feature.slot()].xml_kind = XmlKind::Attribute;
            feature
        };
        self.features[feature.slot()].namespace = ns.map(SmolStr::new);
        tracing::trace!(ns = ?ns, local, is_element, "demanded feature");
        feature
    }
}

/// Prefix for a demanded package: the last alphanumeric run of the URI.
fn demand_prefix(uri: &str) -> String {
    let candidate = uri
        .rsplit(|c: char| !c.is_ascii_alphanumeric())
        .find(|segment| segment.starts_with(|c: char| c.is_ascii_alphabetic()));
    candidate.unwrap_or("ns").to_ascii_lowercase()
}
