//! Slot values and literal conversion.

use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;
use thiserror::Error;

use crate::base::{FeatureId, NodeId};

/// Primitive data types an attribute feature can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    String,
    Integer,
    Real,
    Boolean,
}

impl DataType {
    /// Convert lexical XML text into a value of this type.
    pub fn parse(self, literal: &str) -> Result<Value, ValueError> {
        let invalid = || ValueError::InvalidLiteral {
            literal: literal.to_string(),
            expected: self,
        };
        match self {
            DataType::String => Ok(Value::Str(Arc::from(literal))),
            DataType::Integer => literal.trim().parse().map(Value::Int).map_err(|_| invalid()),
            DataType::Real => literal.trim().parse().map(Value::Real).map_err(|_| invalid()),
            DataType::Boolean => match literal.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (DataType::String, Value::Str(_))
                | (DataType::Integer, Value::Int(_))
                | (DataType::Real, Value::Real(_))
                | (DataType::Boolean, Value::Bool(_))
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Real => "real",
            DataType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A single value held in a node slot.
///
/// `Entry` is a feature-map entry: the feature it stands for plus the
/// value. Mixed content, wildcard content and recorded unknown features are
/// all stored as entries.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Str(Arc<str>),
    Int(i64),
    Real(f64),
    Bool(bool),
    Node(NodeId),
    Entry(FeatureId, Box<Value>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(node) => Some(*node),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Unwrap a feature-map entry into its feature and value.
    pub fn as_entry(&self) -> Option<(FeatureId, &Value)> {
        match self {
            Value::Entry(feature, value) => Some((*feature, value)),
            _ => None,
        }
    }
}

/// Rejection of a value by the graph.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ValueError {
    #[error("value '{literal}' is not a valid {expected}")]
    InvalidLiteral { literal: String, expected: DataType },

    #[error("feature '{feature}' expects {expected}, found {found}")]
    TypeMismatch {
        feature: SmolStr,
        expected: SmolStr,
        found: SmolStr,
    },

    #[error("type '{owner}' has no feature '{feature}' and no wildcard to hold it")]
    UnknownFeature { feature: SmolStr, owner: SmolStr },

    #[error("feature '{feature}' cannot be assigned from text")]
    NotDataValued { feature: SmolStr },
}
