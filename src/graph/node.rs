//! Graph nodes.

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::base::{FeatureId, NodeId, TypeId};
use crate::meta::Value;

/// An object in a [`Resource`](super::Resource).
///
/// Slots keep insertion order so a node reads back in document order.
/// Single-valued features hold at most one value in their slot.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) ty: TypeId,
    pub(crate) values: IndexMap<FeatureId, Vec<Value>>,
    pub(crate) container: Option<(NodeId, FeatureId)>,
    pub(crate) proxy_uri: Option<SmolStr>,
    pub(crate) id: Option<SmolStr>,
}

impl Node {
    pub(crate) fn new(ty: TypeId) -> Self {
        Self {
            ty,
            values: IndexMap::new(),
            container: None,
            proxy_uri: None,
            id: None,
        }
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// All values of a feature, empty when unset.
    pub fn get(&self, feature: FeatureId) -> &[Value] {
        self.values.get(&feature).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The single value of a feature.
    pub fn get_one(&self, feature: FeatureId) -> Option<&Value> {
        self.get(feature).first()
    }

    pub fn is_set(&self, feature: FeatureId) -> bool {
        !self.get(feature).is_empty()
    }

    /// Features with at least one value, in first-set order.
    pub fn set_features(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.values
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(feature, _)| *feature)
    }

    /// Containing node and the containment feature holding this node.
    pub fn container(&self) -> Option<(NodeId, FeatureId)> {
        self.container
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy_uri.is_some()
    }

    pub fn proxy_uri(&self) -> Option<&str> {
        self.proxy_uri.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}
