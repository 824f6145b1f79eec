//! The object graph and the collaborator traits the loader writes through.
//!
//! The loader never touches node storage directly; it creates objects with
//! an [`ObjectFactory`], assigns values with a [`ValueSetter`] and looks up
//! identifiers with an [`IdentifierIndex`]. [`Resource`] implements all three.

mod node;
mod resource;

pub use node::Node;
pub use resource::Resource;

use crate::base::{FeatureId, NodeId, TypeId};
use crate::meta::{Metamodel, Value, ValueError};

/// Where a value goes in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertAt {
    /// After the existing values.
    Append,
    /// At this index, clamped to the list length. An existing reference is
    /// moved there instead of duplicated.
    Index(usize),
    /// Replace whatever the slot holds.
    Whole,
}

pub trait ObjectFactory {
    /// Instantiate `ty`. Returns `None` when the type cannot be instantiated.
    fn create(&mut self, meta: &Metamodel, ty: TypeId) -> Option<NodeId>;
}

pub trait ValueSetter {
    /// Assign (or with `None`, clear) a feature value.
    fn set_value(
        &mut self,
        meta: &Metamodel,
        node: NodeId,
        feature: FeatureId,
        value: Option<Value>,
        at: InsertAt,
    ) -> Result<(), ValueError>;

    /// Insert several references at their recorded positions, lowest first.
    fn set_many_values(
        &mut self,
        meta: &Metamodel,
        holder: NodeId,
        feature: FeatureId,
        values: &[(NodeId, usize)],
    ) -> Vec<ValueError>;
}

pub trait IdentifierIndex {
    fn lookup(&self, meta: &Metamodel, identifier: &str) -> Option<NodeId>;
}
