//! Streaming event driver.
//!
//! [`XmlHandler`] consumes [`XmlEvent`]s one at a time and builds a
//! [`Resource`] against a [`Metamodel`]. Each start tag pushes exactly one
//! [`Frame`] and each end tag pops it, so the handler never needs to see the
//! document twice. Identifier references that point forward are parked in the
//! [`ReferenceLedger`] and retried whenever a top-level element closes and
//! once more at the end of the document.
//!
//! ```text
//! StartElement ─┬─ empty stack ──→ top-level object (or document root)
//!               ├─ error frame ──→ error frame
//!               └─ otherwise ────→ feature of the current object
//!                                   ├─ data        → Scalar frame
//!                                   ├─ containment → Object frame
//!                                   ├─ reference   → Reference frame
//!                                   └─ unknown     → Unknown / Error frame
//! ```

use rustc_hash::FxHashSet;
use smol_str::SmolStr;

use super::cache::{ResolutionCache, ResolveMode};
use super::diagnostics::{Diagnostic, DiagnosticCollector, DiagnosticKind, Severity};
use super::error::LoadError;
use super::events::{DocumentInfo, XmlAttribute, XmlEvent, split_qname};
use super::ledger::{PendingId, ReferenceLedger};
use super::namespace::NamespaceScope;
use super::options::{LoadOptions, ReferenceStyle, UnknownFeaturePolicy};
use super::reconcile::SameDocumentProxies;
use super::stack::{ElementStack, Frame, FrameKind, MixedTarget};
use crate::base::{FeatureId, LineCol, NodeId, PackageId, TypeId};
use crate::graph::{IdentifierIndex, InsertAt, ObjectFactory, Resource, ValueSetter};
use crate::meta::{FeatureKind, MetadataLoader, Metamodel, ValueError, Value, XSI_URI};

/// Lifecycle of a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    /// Waiting for the first event.
    Ready,
    Parsing,
    /// `EndDocument` was handled; call [`XmlHandler::finish`].
    Finished,
    /// A fatal error stopped the load; call [`XmlHandler::reset`].
    Aborted,
}

/// A loaded document and everything that went wrong while loading it.
#[derive(Debug)]
pub struct LoadOutcome {
    pub resource: Resource,
    pub diagnostics: Vec<Diagnostic>,
}

impl LoadOutcome {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

pub struct XmlHandler<'m> {
    meta: &'m mut Metamodel,
    loader: Option<Box<dyn MetadataLoader + 'm>>,
    options: LoadOptions,
    state: HandlerState,
    position: LineCol,

    resource: Resource,
    stack: ElementStack,
    scope: NamespaceScope,
    /// A prefix mapping already opened the scope of the next element.
    needs_push_scope: bool,

    cache: ResolutionCache,
    ledger: ReferenceLedger,
    proxies: SameDocumentProxies,
    diagnostics: DiagnosticCollector,

    /// Content of the current scalar, simple-content or reference element.
    text: Option<String>,
    /// Pending text for the current mixed target.
    mixed_text: Option<String>,
    in_cdata: bool,
    /// Comments and instructions seen before the root (extended metadata only).
    prolog: Option<Vec<Value>>,

    deferred: Vec<NodeId>,
    document_root: Option<(TypeId, NodeId)>,
    staged: Vec<PendingId>,
    /// Namespaces the metadata loader was already asked about.
    attempted: FxHashSet<SmolStr>,
}

impl<'m> XmlHandler<'m> {
    pub fn new(meta: &'m mut Metamodel, options: LoadOptions) -> Self {
        Self {
            meta,
            loader: None,
            options,
            state: HandlerState::Ready,
            position: LineCol::UNKNOWN,
            resource: Resource::new(),
            stack: ElementStack::new(),
            scope: NamespaceScope::new(),
            needs_push_scope: true,
            cache: ResolutionCache::new(),
            ledger: ReferenceLedger::new(),
            proxies: SameDocumentProxies::new(),
            diagnostics: DiagnosticCollector::new(),
            text: None,
            mixed_text: None,
            in_cdata: false,
            prolog: None,
            deferred: Vec::new(),
            document_root: None,
            staged: Vec::new(),
            attempted: FxHashSet::default(),
        }
    }

    pub fn with_metadata_loader(mut self, loader: impl MetadataLoader + 'm) -> Self {
        self.loader = Some(Box::new(loader));
        self
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn metamodel(&self) -> &Metamodel {
        &*self.meta
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.diagnostics()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Reset and load into `resource`. Its URI locates diagnostics and
    /// decides which proxies are same-document.
    pub fn prepare(&mut self, resource: Resource) {
        self.reset();
        let location = resource.uri().map(|uri| uri.as_str().to_string());
        self.diagnostics.set_location(location.as_deref());
        self.resource = resource;
    }

    /// Drop all per-document state. The resolution cache survives; it
    /// invalidates itself when the metamodel changes.
    pub fn reset(&mut self) {
        self.state = HandlerState::Ready;
        self.position = LineCol::UNKNOWN;
        self.resource = Resource::new();
        self.stack.clear();
        self.scope.clear();
        self.needs_push_scope = true;
        self.ledger.clear();
        self.proxies.clear();
        self.diagnostics.clear();
        self.diagnostics.set_location(None);
        self.text = None;
        self.mixed_text = None;
        self.in_cdata = false;
        self.prolog = None;
        self.deferred.clear();
        self.document_root = None;
        self.staged.clear();
        self.attempted.clear();
    }

    /// Mark the load as failed. Further events are refused until reset.
    pub fn abort(&mut self) {
        if self.state != HandlerState::Aborted {
            tracing::debug!(depth = self.stack.len(), "load aborted");
        }
        self.state = HandlerState::Aborted;
    }

    pub fn apply_document_info(&mut self, info: &dyn DocumentInfo) {
        if let Some(encoding) = info.encoding() {
            self.resource.encoding = Some(encoding.to_string());
        }
        if let Some(version) = info.xml_version() {
            self.resource.xml_version = Some(version.to_string());
        }
        if let Some(system_id) = info.system_id() {
            self.diagnostics.set_location(Some(system_id));
        }
    }

    /// Feed one event. `position` is where the event starts in the document.
    pub fn handle_event(&mut self, event: XmlEvent<'_>, position: LineCol) -> Result<(), LoadError> {
        match self.state {
            HandlerState::Finished | HandlerState::Aborted => return Err(LoadError::Unusable),
            HandlerState::Ready => self.start_document(),
            HandlerState::Parsing => {}
        }
        self.position = position;

        match event {
            XmlEvent::StartDocument => {}
            XmlEvent::EndDocument => self.end_document(),
            XmlEvent::StartPrefixMapping { prefix, uri } => self.start_prefix_mapping(prefix, uri),
            XmlEvent::EndPrefixMapping { .. } => {}
            XmlEvent::StartElement { name, attributes } => self.start_element(name, attributes),
            XmlEvent::EndElement { name } => self.end_element(name),
            XmlEvent::Characters(text) => self.characters(text),
            XmlEvent::Comment(text) => {
                if self.text.is_none() {
                    self.flush_mixed_text();
                    let key = self.meta.xml().comment;
                    self.add_mixed_entry(key, Value::str(text));
                }
            }
            XmlEvent::StartCdata => {
                if self.text.is_none() {
                    self.flush_mixed_text();
                    self.in_cdata = true;
                }
            }
            XmlEvent::EndCdata => {
                if self.in_cdata {
                    self.flush_mixed_text();
                    self.in_cdata = false;
                }
            }
            XmlEvent::ProcessingInstruction { target, data } => {
                if self.text.is_none() {
                    self.flush_mixed_text();
                    let key = self.meta.xml().processing_instruction;
                    let instruction = if data.is_empty() {
                        target.to_string()
                    } else {
                        format!("{target} {data}")
                    };
                    self.add_mixed_entry(key, Value::str(instruction));
                }
            }
            XmlEvent::Doctype(doctype) => {
                self.resource.doctype = Some(doctype.trim().to_string());
            }
        }
        Ok(())
    }

    /// Take the loaded resource and its diagnostics, leaving the handler
    /// ready for another document.
    pub fn finish(&mut self) -> LoadOutcome {
        if self.state == HandlerState::Parsing {
            tracing::warn!(open = self.stack.len(), "finishing a document that never ended");
            self.end_document();
        }
        let resource = std::mem::take(&mut self.resource);
        let diagnostics = self.diagnostics.take();
        self.reset();
        LoadOutcome { resource, diagnostics }
    }

    // ------------------------------------------------------------------------
    // Document
    // ------------------------------------------------------------------------

    fn start_document(&mut self) {
        tracing::debug!(uri = ?self.resource.uri().map(|u| u.as_str()), "start document");
        self.state = HandlerState::Parsing;
        self.prolog = self.options.extended_metadata().then(Vec::new);
    }

    fn end_document(&mut self) {
        self.flush_mixed_text();
        for node in std::mem::take(&mut self.deferred) {
            self.resource.add_root(node);
        }
        self.resolve_forward_references(true);
        self.scope.clear();
        self.prolog = None;
        self.state = HandlerState::Finished;
        tracing::debug!(
            nodes = self.resource.node_count(),
            errors = self.diagnostics.error_count(),
            "end document"
        );
    }

    fn resolve_forward_references(&mut self, final_pass: bool) {
        let reconciled = self.proxies.reconcile(self.meta, &mut self.resource);
        let summary = self
            .ledger
            .try_resolve_all(self.meta, &mut self.resource, final_pass, &mut self.diagnostics);
        if final_pass {
            self.proxies.clear();
        }
        if reconciled > 0 || summary.resolved > 0 || summary.unresolved > 0 {
            tracing::debug!(
                final_pass,
                reconciled,
                resolved = summary.resolved,
                unresolved = summary.unresolved,
                pending = self.ledger.len(),
                "forward references"
            );
        }
    }

    fn start_prefix_mapping(&mut self, prefix: &str, uri: &str) {
        if self.needs_push_scope {
            self.scope.push_scope();
            self.needs_push_scope = false;
        }
        self.scope.declare(prefix, uri);
        self.resource.record_namespace(prefix, uri);
    }

    // ------------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------------

    fn start_element(&mut self, name: &str, attrs: &[XmlAttribute<'_>]) {
        if self.needs_push_scope {
            self.scope.push_scope();
        }
        self.needs_push_scope = true;
        self.flush_mixed_text();

        let frame = if self.stack.is_error() {
            Frame::error(name)
        } else {
            self.handle_schema_locations(attrs);
            if self.stack.is_empty() {
                self.create_top_object(name, attrs)
            } else if let Some(owner) = self.stack.peek_object() {
                self.dispatch_feature(owner, name, attrs)
            } else {
                // Elements nested in a data or reference element.
                self.diagnostics.feature_not_found(name, None, self.position);
                Frame::error(name)
            }
        };
        tracing::trace!(name, depth = self.stack.len(), kind = ?frame.kind, "start element");
        self.stack.push(frame);
    }

    fn end_element(&mut self, name: &str) {
        self.flush_mixed_text();
        let Some(frame) = self.stack.pop() else {
            tracing::warn!(name, "end tag without an open element");
            return;
        };
        match frame.kind {
            FrameKind::Object {
                node,
                simple: Some(feature),
            } => {
                if let Some(text) = self.text.take().filter(|t| !t.is_empty()) {
                    let at = self.insert_mode(feature);
                    self.assign_literal(node, feature, &text, at);
                }
            }
            FrameKind::Scalar { holder, feature } => {
                let text = self.text.take().unwrap_or_default();
                let at = self.insert_mode(feature);
                match self.meta.parse_literal(feature, &text) {
                    Ok(value) => self.assign_element(holder, feature, value, at),
                    Err(err) => self.diagnostics.illegal_value(&err, holder, feature, self.position),
                }
            }
            FrameKind::Reference {
                holder,
                feature,
                proxy_type,
            } => {
                if let Some(text) = self.text.take().filter(|t| !t.trim().is_empty()) {
                    self.set_value_from_id(holder, feature, &text, proxy_type);
                }
            }
            FrameKind::Object { .. } | FrameKind::Unknown { .. } | FrameKind::Error => {}
        }

        self.scope.pop_scope();
        self.needs_push_scope = true;
        if self.stack.is_empty() {
            self.resolve_forward_references(false);
        }
    }

    fn create_top_object(&mut self, name: &str, attrs: &[XmlAttribute<'_>]) -> Frame {
        let (prefix, local) = split_qname(name);
        let ns = self.scope.resolve(prefix).map(SmolStr::new);
        let ns = ns.as_deref();

        let Some(package) = self.package_for(ns) else {
            self.diagnostics.package_not_found(ns, self.position);
            return Frame::error(name);
        };

        // Global elements of a package with a document root hang off one
        // shared root object.
        if self.options.extended_metadata() && package != self.meta.xml().package {
            if let Some(root_type) = self.meta.package(package).document_root {
                if let Some(feature) = self.resolve_feature(root_type, ns, local, true) {
                    return self.top_through_document_root(root_type, feature, name, attrs);
                }
            }
        }

        let ty = match self.explicit_type(attrs) {
            Some(Ok(ty)) => Some(ty),
            Some(Err(type_name)) => {
                self.diagnostics.class_not_found(&type_name, self.position);
                return Frame::error(name);
            }
            None => self.cache.type_of(&*self.meta, ns, local),
        };
        let Some(ty) = ty else {
            self.diagnostics.class_not_found(name, self.position);
            return Frame::error(name);
        };
        let Some(node) = self.resource.create(self.meta, ty) else {
            let qualified = self.meta.qualified_name(ty);
            self.diagnostics.class_not_found(&qualified, self.position);
            return Frame::error(name);
        };

        self.attach_top(node);
        self.adopt_prolog(node);
        let frame = self.object_frame(node, name);
        self.handle_attributes(node, attrs);
        frame
    }

    fn top_through_document_root(
        &mut self,
        root_type: TypeId,
        feature: FeatureId,
        name: &str,
        attrs: &[XmlAttribute<'_>],
    ) -> Frame {
        let root = match self.document_root {
            Some((ty, node)) if ty == root_type => node,
            _ => {
                let Some(node) = self.resource.create(self.meta, root_type) else {
                    let qualified = self.meta.qualified_name(root_type);
                    self.diagnostics.class_not_found(&qualified, self.position);
                    return Frame::error(name);
                };
                self.attach_top(node);
                self.adopt_prolog(node);
                self.document_root = Some((root_type, node));
                node
            }
        };
        self.process_feature(root, feature, name, attrs)
    }

    fn attach_top(&mut self, node: NodeId) {
        if self.options.defer_attachment {
            self.deferred.push(node);
        } else {
            self.resource.add_root(node);
        }
    }

    /// Resolve a child element against the current object.
    fn dispatch_feature(&mut self, owner: NodeId, name: &str, attrs: &[XmlAttribute<'_>]) -> Frame {
        let (prefix, local) = split_qname(name);
        let ns = self.scope.resolve(prefix).map(SmolStr::new);
        let owner_type = self.resource.node(owner).ty();
        match self.resolve_feature(owner_type, ns.as_deref(), local, true) {
            Some(feature) => self.process_feature(owner, feature, name, attrs),
            None => self.unknown_element(owner, name, ns.as_deref(), local, attrs),
        }
    }

    fn process_feature(&mut self, owner: NodeId, feature: FeatureId, name: &str, attrs: &[XmlAttribute<'_>]) -> Frame {
        if self.is_nil(attrs) {
            if !self.meta.feature(feature).many {
                self.set(owner, feature, None, InsertAt::Whole);
            }
            return Frame::error(name);
        }

        match self.meta.feature(feature).kind {
            FeatureKind::Attribute(_) => {
                self.text = Some(String::new());
                Frame::new(FrameKind::Scalar { holder: owner, feature }, name)
            }
            FeatureKind::FeatureMap => {
                self.diagnostics.feature_not_found(name, Some(owner), self.position);
                Frame::error(name)
            }
            FeatureKind::Reference {
                target,
                containment: true,
                ..
            } => self.create_child(owner, feature, target, name, attrs),
            FeatureKind::Reference { target, .. } => {
                let href = self.options.reference_style == ReferenceStyle::Attribute
                    && attrs.iter().any(|a| a.name == self.options.href_attribute.as_str());
                if href {
                    return self.create_child(owner, feature, target, name, attrs);
                }

                let proxy_type = match self.explicit_type(attrs) {
                    Some(Ok(ty)) => Some(ty),
                    Some(Err(type_name)) => {
                        self.diagnostics.class_not_found(&type_name, self.position);
                        None
                    }
                    None => None,
                };
                let idref = attrs
                    .iter()
                    .find(|a| a.name == self.options.idref_attribute.as_str())
                    .map(|a| a.value.to_string());
                if let Some(ids) = idref {
                    self.set_value_from_id(owner, feature, &ids, proxy_type);
                }
                self.text = Some(String::new());
                Frame::new(
                    FrameKind::Reference {
                        holder: owner,
                        feature,
                        proxy_type,
                    },
                    name,
                )
            }
        }
    }

    /// Instantiate a contained (or `href`-proxied) child and make it current.
    fn create_child(
        &mut self,
        owner: NodeId,
        feature: FeatureId,
        target: TypeId,
        name: &str,
        attrs: &[XmlAttribute<'_>],
    ) -> Frame {
        let ty = match self.explicit_type(attrs) {
            Some(Ok(ty)) => ty,
            Some(Err(type_name)) => {
                self.diagnostics.class_not_found(&type_name, self.position);
                return Frame::error(name);
            }
            None => target,
        };
        let Some(child) = self.resource.create(self.meta, ty) else {
            let qualified = self.meta.qualified_name(ty);
            self.diagnostics.class_not_found(&qualified, self.position);
            return Frame::error(name);
        };
        self.assign_element(owner, feature, Value::Node(child), InsertAt::Append);
        let frame = self.object_frame(child, name);
        self.handle_attributes(child, attrs);
        frame
    }

    fn unknown_element(
        &mut self,
        owner: NodeId,
        name: &str,
        ns: Option<&str>,
        local: &str,
        attrs: &[XmlAttribute<'_>],
    ) -> Frame {
        match self.options.unknown_features {
            UnknownFeaturePolicy::Report => {
                self.diagnostics.feature_not_found(local, Some(owner), self.position);
                Frame::error(name)
            }
            UnknownFeaturePolicy::Record => {
                let extension = self.resource.ensure_extension(self.meta, owner);
                let feature = self.meta.demand_feature(ns, local, true);
                let any_type = self.meta.xml().any_type;
                let Some(child) = self.resource.create(self.meta, any_type) else {
                    return Frame::error(name);
                };
                self.set(extension, feature, Some(Value::Node(child)), InsertAt::Append);
                self.handle_attributes(child, attrs);
                let mixed = self.meta.xml().mixed;
                Frame::new(FrameKind::Unknown { node: child }, name).with_mixed(Some(MixedTarget::Node {
                    node: child,
                    feature: mixed,
                }))
            }
        }
    }

    fn object_frame(&mut self, node: NodeId, name: &str) -> Frame {
        let def = self.meta.type_def(self.resource.node(node).ty());
        let simple = def.simple;
        let mixed = def.mixed.map(|feature| MixedTarget::Node { node, feature });
        if simple.is_some() {
            self.text = Some(String::new());
        }
        Frame::new(FrameKind::Object { node, simple }, name).with_mixed(mixed)
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    fn handle_attributes(&mut self, node: NodeId, attrs: &[XmlAttribute<'_>]) {
        for attr in attrs {
            let name = attr.name.as_ref();
            let (prefix, local) = split_qname(name);
            if name == "xmlns" || prefix == Some("xmlns") || self.is_xsi(prefix) {
                continue;
            }

            let is_id = name == self.options.id_attribute.as_str() || (prefix == Some("xmi") && local == "id");
            if is_id {
                self.resource.set_id(node, attr.value.trim());
            } else if prefix == Some("xmi") {
                continue;
            }

            if self.options.reference_style == ReferenceStyle::Attribute && name == self.options.href_attribute.as_str() {
                self.resource.make_proxy(node, attr.value.trim());
                self.proxies.track_if_same_document(&self.resource, node);
                continue;
            }

            // Unprefixed attributes are in no namespace.
            let ns = prefix.and_then(|p| self.scope.resolve(Some(p))).map(SmolStr::new);
            let ty = self.resource.node(node).ty();
            match self.resolve_feature(ty, ns.as_deref(), local, false) {
                Some(feature) => self.set_attribute_value(node, feature, &attr.value),
                None if is_id => {}
                None => self.unknown_attribute(node, ns.as_deref(), local, &attr.value),
            }
        }
    }

    fn set_attribute_value(&mut self, node: NodeId, feature: FeatureId, value: &str) {
        let def = self.meta.feature(feature);
        let (kind, many, is_id) = (def.kind, def.many, def.is_id);
        match kind {
            FeatureKind::Attribute(_) => {
                if many {
                    for token in value.split_whitespace() {
                        self.assign_literal(node, feature, token, InsertAt::Append);
                    }
                } else {
                    self.assign_literal(node, feature, value, InsertAt::Whole);
                }
                if is_id {
                    self.resource.set_id(node, value.trim());
                }
            }
            FeatureKind::Reference { .. } => self.set_value_from_id(node, feature, value, None),
            FeatureKind::FeatureMap => {
                let err = ValueError::NotDataValued {
                    feature: self.meta.feature(feature).name.clone(),
                };
                self.diagnostics.illegal_value(&err, node, feature, self.position);
            }
        }
    }

    fn unknown_attribute(&mut self, node: NodeId, ns: Option<&str>, local: &str, value: &str) {
        match self.options.unknown_features {
            UnknownFeaturePolicy::Report => {
                self.diagnostics.feature_not_found(local, Some(node), self.position);
            }
            UnknownFeaturePolicy::Record => {
                let extension = self.resource.ensure_extension(self.meta, node);
                let feature = self.meta.demand_feature(ns, local, false);
                self.set(extension, feature, Some(Value::str(value)), InsertAt::Append);
            }
        }
    }

    fn handle_schema_locations(&mut self, attrs: &[XmlAttribute<'_>]) {
        let mut locations: Vec<(Option<String>, String)> = Vec::new();
        for attr in attrs {
            let (prefix, local) = split_qname(&attr.name);
            if !self.is_xsi(prefix) {
                continue;
            }
            match local {
                "schemaLocation" => {
                    let tokens: Vec<&str> = attr.value.split_whitespace().collect();
                    for pair in tokens.chunks(2) {
                        if let [ns, location] = pair {
                            self.resource.record_schema_location(Some(ns), location);
                            locations.push((Some(ns.to_string()), location.to_string()));
                        }
                    }
                }
                "noNamespaceSchemaLocation" => {
                    let location = attr.value.trim();
                    self.resource.record_schema_location(None, location);
                    locations.push((None, location.to_string()));
                }
                _ => {}
            }
        }

        if locations.is_empty() || !self.options.process_schema_locations {
            return;
        }
        let Some(loader) = self.loader.as_mut() else {
            return;
        };
        if let Err(err) = loader.load_schemas(&mut *self.meta, &locations) {
            tracing::warn!(%err, "schema locations could not be loaded");
            self.diagnostics.metadata_unavailable(err.to_string(), self.position);
        }
    }

    // ------------------------------------------------------------------------
    // Identifier references
    // ------------------------------------------------------------------------

    /// Assign a whitespace-separated IDREF list to a reference feature.
    ///
    /// `#x` is a local identifier; `doc#x` becomes a proxy; a token with a
    /// colon and no `#` names the type of the next proxy. Identifiers that
    /// cannot be resolved yet are staged with their absolute list ordinal.
    fn set_value_from_id(&mut self, holder: NodeId, feature: FeatureId, ids: &str, proxy_type: Option<TypeId>) {
        let def = self.meta.feature(feature);
        let (target, many) = (def.reference_target(), def.many);
        let Some(target) = target else {
            let err = ValueError::NotDataValued {
                feature: def.name.clone(),
            };
            self.diagnostics.illegal_value(&err, holder, feature, self.position);
            return;
        };

        let base = if many {
            self.resource.get(holder, feature).len() + self.ledger.pending_count(holder, feature)
        } else {
            0
        };
        let mut staged = std::mem::take(&mut self.staged);
        staged.clear();
        let mut type_hint = proxy_type;
        let mut ordinal = 0;

        for token in ids.split_whitespace() {
            let identifier = match token.find('#') {
                Some(0) => &token[1..],
                Some(_) => {
                    let ty = type_hint.take().unwrap_or(target);
                    match self.resource.create(self.meta, ty) {
                        Some(proxy) => {
                            self.resource.make_proxy(proxy, token);
                            self.proxies.track_if_same_document(&self.resource, proxy);
                            let at = position_in(many, base + ordinal);
                            self.set(holder, feature, Some(Value::Node(proxy)), at);
                        }
                        None => {
                            let qualified = self.meta.qualified_name(ty);
                            self.diagnostics.class_not_found(&qualified, self.position);
                        }
                    }
                    ordinal += 1;
                    continue;
                }
                None if token.contains(':') => {
                    type_hint = self.resolve_type_name(token);
                    if type_hint.is_none() {
                        self.diagnostics.class_not_found(token, self.position);
                    }
                    continue;
                }
                None => token,
            };

            let found = if self.options.defer_idref_resolution {
                None
            } else {
                self.resource.lookup(self.meta, identifier)
            };
            match found {
                Some(node) => {
                    let at = position_in(many, base + ordinal);
                    self.set(holder, feature, Some(Value::Node(node)), at);
                }
                None => staged.push(PendingId::new(identifier, base + ordinal)),
            }
            ordinal += 1;
        }

        self.ledger.commit(holder, feature, &mut staged, self.position);
        self.staged = staged;
    }

    // ------------------------------------------------------------------------
    // Mixed content
    // ------------------------------------------------------------------------

    fn current_mixed(&self) -> Option<MixedTarget> {
        if self.stack.is_empty() {
            return self.prolog.as_ref().map(|_| MixedTarget::Prolog);
        }
        self.stack.peek_mixed()
    }

    fn characters(&mut self, text: &str) {
        if self.stack.is_error() {
            return;
        }
        if let Some(buffer) = self.text.as_mut() {
            buffer.push_str(text);
        } else if self.current_mixed().is_some() {
            self.mixed_text.get_or_insert_with(String::new).push_str(text);
        }
    }

    fn flush_mixed_text(&mut self) {
        let Some(text) = self.mixed_text.take() else {
            return;
        };
        let target = self.current_mixed();
        if text.is_empty() || (target == Some(MixedTarget::Prolog) && text.trim().is_empty()) {
            return;
        }
        let key = if self.in_cdata {
            self.meta.xml().cdata
        } else {
            self.meta.xml().text
        };
        self.add_mixed_entry(key, Value::str(text));
    }

    fn add_mixed_entry(&mut self, key: FeatureId, value: Value) {
        let entry = Value::Entry(key, Box::new(value));
        match self.current_mixed() {
            Some(MixedTarget::Prolog) => {
                if let Some(prolog) = self.prolog.as_mut() {
                    prolog.push(entry);
                }
            }
            Some(MixedTarget::Node { node, feature }) => {
                self.set(node, feature, Some(entry), InsertAt::Append);
            }
            None => {}
        }
    }

    /// Move buffered prolog entries into the first top-level object.
    fn adopt_prolog(&mut self, node: NodeId) {
        let Some(prolog) = self.prolog.take() else {
            return;
        };
        let Some(mixed) = self.meta.type_def(self.resource.node(node).ty()).mixed else {
            return;
        };
        for entry in prolog {
            self.set(node, mixed, Some(entry), InsertAt::Append);
        }
    }

    // ------------------------------------------------------------------------
    // Resolution helpers
    // ------------------------------------------------------------------------

    fn resolve_feature(&mut self, owner: TypeId, ns: Option<&str>, local: &str, is_element: bool) -> Option<FeatureId> {
        let mode = ResolveMode {
            extended_metadata: self.options.extended_metadata(),
            precedence: self.options.feature_precedence,
        };
        if mode.extended_metadata && ns.is_some() {
            self.load_package(ns);
        }
        self.cache.feature(&mut *self.meta, owner, ns, local, is_element, mode)
    }

    /// Package for `ns`: registered, loaded, or (for open content) demanded.
    fn package_for(&mut self, ns: Option<&str>) -> Option<PackageId> {
        if let Some(package) = self.load_package(ns) {
            return Some(package);
        }
        let open = self.options.unknown_features == UnknownFeaturePolicy::Record || self.options.process_any_xml;
        (self.options.extended_metadata() && open).then(|| self.meta.demand_package(ns))
    }

    fn load_package(&mut self, ns: Option<&str>) -> Option<PackageId> {
        if let Some(package) = self.meta.package_for_namespace(ns) {
            return Some(package);
        }
        let uri = ns.unwrap_or("");
        let loader = self.loader.as_mut()?;
        if !self.attempted.insert(SmolStr::new(uri)) {
            return None;
        }
        match loader.load_package(&mut *self.meta, uri) {
            Ok(Some(package)) => {
                tracing::debug!(uri, "loaded package on demand");
                Some(package)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(%err, "metadata loader failed");
                self.diagnostics.metadata_unavailable(err.to_string(), self.position);
                None
            }
        }
    }

    /// Type named by an `xsi:type` or `xmi:type` attribute. `Err` carries
    /// the name that did not resolve.
    fn explicit_type(&mut self, attrs: &[XmlAttribute<'_>]) -> Option<Result<TypeId, String>> {
        let qname = attrs
            .iter()
            .find(|attr| {
                let (prefix, local) = split_qname(&attr.name);
                local == "type" && (self.is_xsi(prefix) || prefix == Some("xmi"))
            })?
            .value
            .trim()
            .to_string();
        Some(self.resolve_type_name(&qname).ok_or(qname))
    }

    fn resolve_type_name(&mut self, qname: &str) -> Option<TypeId> {
        let (prefix, local) = split_qname(qname);
        let ns = self.scope.resolve(prefix).map(SmolStr::new);
        let package = self.package_for(ns.as_deref())?;
        if let Some(ty) = self.cache.type_of(&*self.meta, ns.as_deref(), local) {
            return Some(ty);
        }
        self.meta
            .package(package)
            .demanded
            .then(|| self.meta.demand_type(package, local))
    }

    fn is_xsi(&self, prefix: Option<&str>) -> bool {
        match prefix {
            None => false,
            Some(prefix) => match self.scope.resolve(Some(prefix)) {
                Some(uri) => uri == XSI_URI,
                None => prefix == "xsi",
            },
        }
    }

    fn is_nil(&self, attrs: &[XmlAttribute<'_>]) -> bool {
        attrs.iter().any(|attr| {
            let (prefix, local) = split_qname(&attr.name);
            local == "nil" && self.is_xsi(prefix) && matches!(attr.value.trim(), "true" | "1")
        })
    }

    // ------------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------------

    fn insert_mode(&self, feature: FeatureId) -> InsertAt {
        if self.meta.feature(feature).many {
            InsertAt::Append
        } else {
            InsertAt::Whole
        }
    }

    fn set(&mut self, node: NodeId, feature: FeatureId, value: Option<Value>, at: InsertAt) -> bool {
        match self.resource.set_value(self.meta, node, feature, value, at) {
            Ok(()) => true,
            Err(err) => {
                self.diagnostics.illegal_value(&err, node, feature, self.position);
                false
            }
        }
    }

    fn assign_literal(&mut self, node: NodeId, feature: FeatureId, literal: &str, at: InsertAt) {
        match self.meta.parse_literal(feature, literal) {
            Ok(value) => {
                self.set(node, feature, Some(value), at);
            }
            Err(err) => self.diagnostics.illegal_value(&err, node, feature, self.position),
        }
    }

    /// Set an element-valued feature, mirroring it into the owner's mixed
    /// feature map so content order survives.
    fn assign_element(&mut self, owner: NodeId, feature: FeatureId, value: Value, at: InsertAt) {
        if !self.set(owner, feature, Some(value.clone()), at) {
            return;
        }
        let ty = self.resource.node(owner).ty();
        if !self.meta.has_feature(ty, feature) {
            // Wildcard content already landed in a feature map.
            return;
        }
        if let Some(mixed) = self.meta.type_def(ty).mixed {
            if mixed != feature {
                self.set(owner, mixed, Some(Value::Entry(feature, Box::new(value))), InsertAt::Append);
            }
        }
    }
}

fn position_in(many: bool, index: usize) -> InsertAt {
    if many { InsertAt::Index(index) } else { InsertAt::Whole }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::DataType;

    struct Fixture {
        meta: Metamodel,
        reference: FeatureId,
        name: FeatureId,
    }

    /// Package with no namespace: `a` has a `ref` to `b` and a `name`.
    fn fixture() -> Fixture {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("", "t");
        let a = meta.add_type(pkg, "a", &[]);
        let b = meta.add_type(pkg, "b", &[]);
        let reference = meta.add_reference(a, "ref", b, false);
        let name = meta.add_attribute(a, "name", DataType::String);
        Fixture { meta, reference, name }
    }

    fn start<'a>(handler: &mut XmlHandler<'_>, name: &'a str, attrs: &'a [XmlAttribute<'a>]) {
        handler
            .handle_event(XmlEvent::StartElement { name, attributes: attrs }, LineCol::new(0, 0))
            .unwrap();
    }

    fn end(handler: &mut XmlHandler<'_>, name: &str) {
        handler
            .handle_event(XmlEvent::EndElement { name }, LineCol::new(0, 0))
            .unwrap();
    }

    #[test]
    fn test_forward_reference_resolves_when_target_closes() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        handler.handle_event(XmlEvent::StartDocument, LineCol::new(0, 0)).unwrap();

        let a_attrs = [XmlAttribute::new("id", "1")];
        start(&mut handler, "a", &a_attrs);
        let ref_attrs = [XmlAttribute::new("idref", "2")];
        start(&mut handler, "ref", &ref_attrs);
        end(&mut handler, "ref");
        end(&mut handler, "a");

        let a = handler.resource().node_by_id("1").unwrap();
        assert!(handler.resource().get(a, f.reference).is_empty());

        let b_attrs = [XmlAttribute::new("id", "2")];
        start(&mut handler, "b", &b_attrs);
        end(&mut handler, "b");

        let b = handler.resource().node_by_id("2").unwrap();
        assert_eq!(handler.resource().get(a, f.reference), &[Value::Node(b)]);
        assert!(handler.diagnostics().is_empty());

        handler.handle_event(XmlEvent::EndDocument, LineCol::new(0, 0)).unwrap();
        let outcome = handler.finish();
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.resource.contents().len(), 2);
    }

    #[test]
    fn test_scalar_element_text_is_assigned() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        start(&mut handler, "a", &[]);
        start(&mut handler, "name", &[]);
        handler.handle_event(XmlEvent::Characters("Ada"), LineCol::new(0, 0)).unwrap();
        handler.handle_event(XmlEvent::Characters(" L."), LineCol::new(0, 0)).unwrap();
        end(&mut handler, "name");
        end(&mut handler, "a");
        handler.handle_event(XmlEvent::EndDocument, LineCol::new(0, 0)).unwrap();

        let outcome = handler.finish();
        let root = outcome.resource.contents()[0];
        assert_eq!(outcome.resource.get(root, f.name), &[Value::str("Ada L.")]);
    }

    #[test]
    fn test_element_inside_scalar_keeps_text() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        let at = LineCol::new(0, 0);
        start(&mut handler, "a", &[]);
        start(&mut handler, "name", &[]);
        handler.handle_event(XmlEvent::Characters("Ada"), at).unwrap();
        start(&mut handler, "x", &[]);
        handler.handle_event(XmlEvent::Characters("dropped"), at).unwrap();
        end(&mut handler, "x");
        handler.handle_event(XmlEvent::Characters(" L."), at).unwrap();
        end(&mut handler, "name");
        end(&mut handler, "a");
        handler.handle_event(XmlEvent::EndDocument, at).unwrap();

        let outcome = handler.finish();
        let root = outcome.resource.contents()[0];
        assert_eq!(outcome.resource.get(root, f.name), &[Value::str("Ada L.")]);
        assert_eq!(outcome.diagnostics_of(DiagnosticKind::FeatureNotFound).count(), 1);
    }

    #[test]
    fn test_unknown_element_skips_subtree_once() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        start(&mut handler, "a", &[]);
        start(&mut handler, "bogus", &[]);
        start(&mut handler, "nested", &[]);
        assert_eq!(handler.stack_depth(), 3);
        end(&mut handler, "nested");
        end(&mut handler, "bogus");
        end(&mut handler, "a");
        handler.handle_event(XmlEvent::EndDocument, LineCol::new(0, 0)).unwrap();

        let outcome = handler.finish();
        let kinds: Vec<_> = outcome.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, [DiagnosticKind::FeatureNotFound]);
    }

    #[test]
    fn test_unknown_root_type_is_class_not_found() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        start(&mut handler, "zzz", &[]);
        end(&mut handler, "zzz");
        handler.handle_event(XmlEvent::EndDocument, LineCol::new(0, 0)).unwrap();
        let outcome = handler.finish();
        assert_eq!(outcome.diagnostics_of(DiagnosticKind::ClassNotFound).count(), 1);
        assert!(outcome.resource.contents().is_empty());
    }

    #[test]
    fn test_aborted_handler_refuses_events() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        start(&mut handler, "a", &[]);
        handler.abort();
        let err = handler.handle_event(XmlEvent::EndElement { name: "a" }, LineCol::new(0, 0));
        assert!(matches!(err, Err(LoadError::Unusable)));

        handler.reset();
        assert_eq!(handler.state(), HandlerState::Ready);
        assert_eq!(handler.stack_depth(), 0);
        start(&mut handler, "a", &[]);
        assert_eq!(handler.state(), HandlerState::Parsing);
    }

    #[test]
    fn test_finish_ends_an_unterminated_document() {
        let mut f = fixture();
        let mut handler = XmlHandler::new(&mut f.meta, LoadOptions::default());
        start(&mut handler, "a", &[]);
        start(&mut handler, "ref", &[XmlAttribute::new("idref", "missing")]);
        end(&mut handler, "ref");
        end(&mut handler, "a");

        let outcome = handler.finish();
        assert_eq!(outcome.diagnostics_of(DiagnosticKind::UnresolvedReference).count(), 1);
        assert_eq!(handler.state(), HandlerState::Ready);
    }

    #[test]
    fn test_mixed_content_keeps_order() {
        let mut meta = Metamodel::new();
        let pkg = meta.add_package("", "m");
        let doc = meta.add_type(pkg, "doc", &[]);
        let mixed = meta.set_mixed(doc);
        let em_type = meta.add_type(pkg, "Em", &[]);
        let em = meta.add_reference(doc, "em", em_type, true);
        meta.feature_mut(em).many = true;
        let xml = *meta.xml();

        let mut handler = XmlHandler::new(&mut meta, LoadOptions::default());
        let at = LineCol::new(0, 0);
        start(&mut handler, "doc", &[]);
        handler.handle_event(XmlEvent::Characters("hello "), at).unwrap();
        handler.handle_event(XmlEvent::Comment("note"), at).unwrap();
        start(&mut handler, "em", &[]);
        end(&mut handler, "em");
        handler.handle_event(XmlEvent::Characters(" tail"), at).unwrap();
        end(&mut handler, "doc");
        handler.handle_event(XmlEvent::EndDocument, at).unwrap();

        let outcome = handler.finish();
        let root = outcome.resource.contents()[0];
        let keys: Vec<_> = outcome
            .resource
            .get(root, mixed)
            .iter()
            .filter_map(|v| v.as_entry().map(|(key, _)| key))
            .collect();
        assert_eq!(keys, [xml.text, xml.comment, em, xml.text]);
        assert_eq!(outcome.resource.get(root, em).len(), 1);
    }

    #[test]
    fn test_recorded_unknown_content_lands_on_extension() {
        let mut f = fixture();
        let options = LoadOptions::default().with_unknown_features(UnknownFeaturePolicy::Record);
        let mut handler = XmlHandler::new(&mut f.meta, options);
        let at = LineCol::new(0, 0);
        start(&mut handler, "a", &[XmlAttribute::new("color", "red")]);
        start(&mut handler, "note", &[]);
        handler.handle_event(XmlEvent::Characters("keep me"), at).unwrap();
        end(&mut handler, "note");
        end(&mut handler, "a");
        handler.handle_event(XmlEvent::EndDocument, at).unwrap();

        let outcome = handler.finish();
        assert!(outcome.diagnostics.is_empty());
        let root = outcome.resource.contents()[0];
        let extension = outcome.resource.extension(root).unwrap();
        let node = outcome.resource.node(extension);
        assert!(node.set_features().count() >= 2);
    }
}
