//! Arena handles for metamodel entries and graph nodes.
//!
//! Every handle is a plain `u32` index into the owning arena. The owning
//! container (the [`Metamodel`](crate::meta::Metamodel) for types, features
//! and packages, the [`Resource`](crate::graph::Resource) for nodes) is the
//! only place that can turn a handle back into data.

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(pub u32);

        impl $name {
            /// Create a handle from a raw index.
            #[inline]
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            /// Get the raw index.
            #[inline]
            pub const fn index(self) -> u32 {
                self.0
            }

            #[inline]
            pub(crate) const fn slot(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(id: u32) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u32 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

arena_id!(
    /// A node (object) in a [`Resource`](crate::graph::Resource).
    NodeId,
    "node"
);

arena_id!(
    /// A type (class) registered in a [`Metamodel`](crate::meta::Metamodel).
    TypeId,
    "type"
);

arena_id!(
    /// A structural feature of some type.
    FeatureId,
    "feature"
);

arena_id!(
    /// A package, identified in documents by its namespace URI.
    PackageId,
    "package"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_equality() {
        assert_eq!(NodeId::new(1), NodeId::from(1));
        assert_ne!(TypeId::new(1), TypeId::new(2));
    }

    #[test]
    fn test_id_hash() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(FeatureId::new(1));
        set.insert(FeatureId::new(2));
        set.insert(FeatureId::new(1));

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_id_display() {
        assert_eq!(NodeId::new(3).to_string(), "node#3");
        assert_eq!(format!("{:?}", PackageId::new(0)), "PackageId(0)");
    }

    #[test]
    fn test_id_size() {
        assert_eq!(std::mem::size_of::<NodeId>(), 4);
        assert_eq!(std::mem::size_of::<Option<TypeId>>(), 8);
    }
}
