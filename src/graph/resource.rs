//! The object graph produced by a load.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use url::Url;

use super::node::Node;
use super::{IdentifierIndex, InsertAt, ObjectFactory, ValueSetter};
use crate::base::{FeatureId, NodeId, TypeId};
use crate::meta::{FeatureKind, Metamodel, Value, ValueError};

/// A loaded document: an arena of nodes plus the document-level records
/// collected while reading it.
#[derive(Clone, Debug, Default)]
pub struct Resource {
    uri: Option<Url>,
    nodes: Vec<Node>,
    contents: Vec<NodeId>,
    ids: FxHashMap<SmolStr, NodeId>,
    extensions: IndexMap<NodeId, NodeId>,
    namespaces: IndexMap<SmolStr, SmolStr>,
    schema_locations: IndexMap<SmolStr, SmolStr>,
    pub(crate) encoding: Option<String>,
    pub(crate) xml_version: Option<String>,
    pub(crate) doctype: Option<String>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uri(uri: Url) -> Self {
        Self {
            uri: Some(uri),
            ..Self::default()
        }
    }

    pub fn uri(&self) -> Option<&Url> {
        self.uri.as_ref()
    }

    pub fn set_uri(&mut self, uri: Option<Url>) {
        self.uri = uri;
    }

    // ------------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.slot()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Top-level nodes in document order.
    pub fn contents(&self) -> &[NodeId] {
        &self.contents
    }

    pub fn add_root(&mut self, node: NodeId) {
        if !self.contents.contains(&node) {
            self.contents.push(node);
        }
    }

    pub fn get(&self, node: NodeId, feature: FeatureId) -> &[Value] {
        self.node(node).get(feature)
    }

    /// Register `id` as the identifier of `node`. A later registration of
    /// the same identifier wins.
    pub fn set_id(&mut self, node: NodeId, id: &str) {
        let id = SmolStr::new(id);
        self.nodes[node.slot()].id = Some(id.clone());
        self.ids.insert(id, node);
    }

    pub fn node_by_id(&self, id: &str) -> Option<NodeId> {
        self.ids.get(id).copied()
    }

    /// Extension node holding recorded unknown content of `node`.
    pub fn extension(&self, node: NodeId) -> Option<NodeId> {
        self.extensions.get(&node).copied()
    }

    pub fn extensions(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.extensions.iter().map(|(&node, &ext)| (node, ext))
    }

    pub(crate) fn ensure_extension(&mut self, meta: &Metamodel, node: NodeId) -> NodeId {
        if let Some(ext) = self.extension(node) {
            return ext;
        }
        let ext = self.push_node(meta.xml().any_type);
        self.extensions.insert(node, ext);
        ext
    }

    fn push_node(&mut self, ty: TypeId) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node::new(ty));
        id
    }

    // ------------------------------------------------------------------------
    // Document records
    // ------------------------------------------------------------------------

    /// Prefix to namespace mappings seen in the document. The first
    /// declaration of a prefix is kept.
    pub fn namespaces(&self) -> &IndexMap<SmolStr, SmolStr> {
        &self.namespaces
    }

    pub(crate) fn record_namespace(&mut self, prefix: &str, uri: &str) {
        if !self.namespaces.contains_key(prefix) {
            self.namespaces.insert(SmolStr::new(prefix), SmolStr::new(uri));
        }
    }

    /// Namespace to schema location hints; the empty key holds
    /// `noNamespaceSchemaLocation`.
    pub fn schema_locations(&self) -> &IndexMap<SmolStr, SmolStr> {
        &self.schema_locations
    }

    pub(crate) fn record_schema_location(&mut self, ns: Option<&str>, location: &str) {
        self.schema_locations
            .insert(SmolStr::new(ns.unwrap_or("")), SmolStr::new(location));
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn xml_version(&self) -> Option<&str> {
        self.xml_version.as_deref()
    }

    pub fn doctype(&self) -> Option<&str> {
        self.doctype.as_deref()
    }

    // ------------------------------------------------------------------------
    // Proxies
    // ------------------------------------------------------------------------

    /// Resolve a reference literal against the document URI.
    pub fn resolve_uri(&self, literal: &str) -> SmolStr {
        match &self.uri {
            Some(base) => base
                .join(literal)
                .map(|url| SmolStr::new(url.as_str()))
                .unwrap_or_else(|_| SmolStr::new(literal)),
            None => SmolStr::new(literal),
        }
    }

    /// Whether an already resolved URI points into this document.
    pub fn is_same_document(&self, uri: &str) -> bool {
        let Some((document, _)) = uri.split_once('#') else {
            return false;
        };
        match &self.uri {
            Some(base) => {
                let mut base = base.clone();
                base.set_fragment(None);
                base.as_str() == document
            }
            None => document.is_empty(),
        }
    }

    /// Mark `node` as a proxy for `literal`, resolved against the document URI.
    pub fn make_proxy(&mut self, node: NodeId, literal: &str) -> SmolStr {
        let uri = self.resolve_uri(literal);
        self.nodes[node.slot()].proxy_uri = Some(uri.clone());
        uri
    }

    // ------------------------------------------------------------------------
    // List surgery (opposite aware)
    // ------------------------------------------------------------------------

    pub fn index_of(&self, holder: NodeId, feature: FeatureId, target: NodeId) -> Option<usize> {
        self.get(holder, feature)
            .iter()
            .position(|value| value.as_node() == Some(target))
    }

    /// Move the value at `from` to `to` within a many-valued slot.
    pub fn move_value(&mut self, holder: NodeId, feature: FeatureId, to: usize, from: usize) {
        if let Some(values) = self.nodes[holder.slot()].values.get_mut(&feature) {
            if from < values.len() && to < values.len() && from != to {
                let value = values.remove(from);
                values.insert(to, value);
            }
        }
    }

    /// Remove the value at `index`, clearing the other end of the link.
    pub fn remove_at(
        &mut self,
        meta: &Metamodel,
        holder: NodeId,
        feature: FeatureId,
        index: usize,
    ) -> Option<Value> {
        let values = self.nodes[holder.slot()].values.get_mut(&feature)?;
        if index >= values.len() {
            return None;
        }
        let removed = values.remove(index);
        self.unlink(meta, holder, feature, &removed);
        Some(removed)
    }

    /// Replace the node at `index` with `target`, updating both ends.
    pub fn replace_at(
        &mut self,
        meta: &Metamodel,
        holder: NodeId,
        feature: FeatureId,
        index: usize,
        target: NodeId,
    ) {
        let Some(values) = self.nodes[holder.slot()].values.get_mut(&feature) else {
            return;
        };
        let Some(slot) = values.get_mut(index) else {
            return;
        };
        let old = std::mem::replace(slot, Value::Node(target));
        self.unlink(meta, holder, feature, &old);
        self.link(meta, holder, feature, &Value::Node(target));
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn slot_mut(&mut self, node: NodeId, feature: FeatureId) -> &mut Vec<Value> {
        self.nodes[node.slot()].values.entry(feature).or_default()
    }

    fn check(&self, meta: &Metamodel, feature: FeatureId, value: &Value) -> Result<(), ValueError> {
        let def = meta.feature(feature);
        let (ok, expected) = match def.kind {
            FeatureKind::Attribute(data_type) => (data_type.accepts(value), SmolStr::new(data_type.to_string())),
            FeatureKind::Reference { target, .. } => {
                let ok = value
                    .as_node()
                    .is_some_and(|node| meta.is_subtype(self.node(node).ty, target));
                (ok, SmolStr::new(meta.qualified_name(target)))
            }
            FeatureKind::FeatureMap => (matches!(value, Value::Entry(..)), SmolStr::new_static("entry")),
        };
        if ok {
            return Ok(());
        }
        Err(ValueError::TypeMismatch {
            feature: def.name.clone(),
            expected,
            found: self.describe(meta, value),
        })
    }

    fn describe(&self, meta: &Metamodel, value: &Value) -> SmolStr {
        match value {
            Value::Str(_) => SmolStr::new_static("string"),
            Value::Int(_) => SmolStr::new_static("integer"),
            Value::Real(_) => SmolStr::new_static("real"),
            Value::Bool(_) => SmolStr::new_static("boolean"),
            Value::Node(node) => SmolStr::new(meta.qualified_name(self.node(*node).ty)),
            Value::Entry(..) => SmolStr::new_static("entry"),
        }
    }

    /// Establish containment and the opposite end for a newly stored value.
    fn link(&mut self, meta: &Metamodel, holder: NodeId, feature: FeatureId, value: &Value) {
        let Value::Node(target) = *value else {
            return;
        };
        let def = meta.feature(feature);
        if def.is_containment() {
            self.nodes[target.slot()].container = Some((holder, feature));
        }
        let Some(opposite) = def.opposite else {
            return;
        };
        if meta.feature(opposite).many {
            let back = self.slot_mut(target, opposite);
            if !back.contains(&Value::Node(holder)) {
                back.push(Value::Node(holder));
            }
        } else {
            let previous = self
                .nodes[target.slot()]
                .values
                .insert(opposite, vec![Value::Node(holder)]);
            // The previous holder no longer points at target.
            for stale in previous.into_iter().flatten() {
                if let Value::Node(other) = stale {
                    if other != holder {
                        self.drop_value(other, feature, target);
                    }
                }
            }
        }
    }

    /// Undo containment and the opposite end of a value that was removed.
    fn unlink(&mut self, meta: &Metamodel, holder: NodeId, feature: FeatureId, value: &Value) {
        let Value::Node(target) = *value else {
            return;
        };
        let def = meta.feature(feature);
        if def.is_containment() && self.nodes[target.slot()].container == Some((holder, feature)) {
            self.nodes[target.slot()].container = None;
        }
        if let Some(opposite) = def.opposite {
            self.drop_value(target, opposite, holder);
        }
    }

    fn drop_value(&mut self, node: NodeId, feature: FeatureId, target: NodeId) {
        if let Some(values) = self.nodes[node.slot()].values.get_mut(&feature) {
            values.retain(|value| value.as_node() != Some(target));
        }
    }

    fn unset(&mut self, meta: &Metamodel, node: NodeId, feature: FeatureId) {
        let old = self.nodes[node.slot()].values.shift_remove(&feature);
        for value in old.into_iter().flatten() {
            self.unlink(meta, node, feature, &value);
        }
    }

    /// Store a value for a feature the node's type does not declare, as an
    /// entry of the wildcard feature map admitting it.
    fn set_wildcard_value(
        &mut self,
        meta: &Metamodel,
        node: NodeId,
        feature: FeatureId,
        value: Value,
    ) -> Result<(), ValueError> {
        let ty = self.node(node).ty;
        let Some(holder) = meta.wildcard_holder(ty, feature) else {
            return Err(ValueError::UnknownFeature {
                feature: meta.feature(feature).name.clone(),
                owner: SmolStr::new(meta.qualified_name(ty)),
            });
        };
        self.check(meta, feature, &value)?;
        if let Value::Node(child) = value {
            if meta.feature(feature).is_containment() {
                self.nodes[child.slot()].container = Some((node, holder));
            }
        }
        self.slot_mut(node, holder)
            .push(Value::Entry(feature, Box::new(value)));
        Ok(())
    }
}

impl ObjectFactory for Resource {
    fn create(&mut self, meta: &Metamodel, ty: TypeId) -> Option<NodeId> {
        if meta.type_def(ty).is_abstract {
            return None;
        }
        Some(self.push_node(ty))
    }
}

impl ValueSetter for Resource {
    fn set_value(
        &mut self,
        meta: &Metamodel,
        node: NodeId,
        feature: FeatureId,
        value: Option<Value>,
        at: InsertAt,
    ) -> Result<(), ValueError> {
        let ty = self.node(node).ty;
        if !meta.has_feature(ty, feature) {
            return match value {
                Some(value) => self.set_wildcard_value(meta, node, feature, value),
                None => Ok(()),
            };
        }

        let Some(value) = value else {
            self.unset(meta, node, feature);
            return Ok(());
        };
        self.check(meta, feature, &value)?;

        let def = meta.feature(feature);
        if !def.many || at == InsertAt::Whole {
            self.unset(meta, node, feature);
            self.slot_mut(node, feature).push(value.clone());
            self.link(meta, node, feature, &value);
            return Ok(());
        }

        // Reference lists are unique: an existing value only moves.
        if let Some(target) = value.as_node() {
            if let Some(existing) = self.index_of(node, feature, target) {
                if let InsertAt::Index(index) = at {
                    let last = self.get(node, feature).len() - 1;
                    self.move_value(node, feature, index.min(last), existing);
                }
                return Ok(());
            }
        }

        let values = self.slot_mut(node, feature);
        match at {
            InsertAt::Index(index) => {
                let index = index.min(values.len());
                values.insert(index, value.clone());
            }
            InsertAt::Append | InsertAt::Whole => values.push(value.clone()),
        }
        self.link(meta, node, feature, &value);
        Ok(())
    }

    fn set_many_values(
        &mut self,
        meta: &Metamodel,
        holder: NodeId,
        feature: FeatureId,
        values: &[(NodeId, usize)],
    ) -> Vec<ValueError> {
        let mut ordered = values.to_vec();
        ordered.sort_by_key(|&(_, index)| index);
        ordered
            .into_iter()
            .filter_map(|(target, index)| {
                self.set_value(meta, holder, feature, Some(Value::Node(target)), InsertAt::Index(index))
                    .err()
            })
            .collect()
    }
}

impl IdentifierIndex for Resource {
    /// Look up a plain identifier, or a `/`-rooted fragment path such as
    /// `/0/@books.2`.
    fn lookup(&self, meta: &Metamodel, fragment: &str) -> Option<NodeId> {
        if let Some(node) = self.node_by_id(fragment) {
            return Some(node);
        }
        let path = fragment.strip_prefix('/')?;
        let mut segments = path.split('/');
        let root_index = match segments.next()? {
            "" => 0,
            index => index.parse().ok()?,
        };
        let mut current = *self.contents.get(root_index)?;
        for segment in segments {
            let step = segment.strip_prefix('@')?;
            let (name, index) = match step.rsplit_once('.') {
                Some((name, index)) => (name, index.parse().ok()?),
                None => (step, 0),
            };
            let ty = self.node(current).ty;
            let feature = meta
                .all_features(ty)
                .into_iter()
                .find(|&feature| meta.feature(feature).name == name)?;
            current = self.get(current, feature).get(index)?.as_node()?;
        }
        Some(current)
    }
}
