//! Type descriptors for fact schema validation.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Type descriptor for fact fields.
///
/// Used by fact schemas to declare field types and validate inserted values.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    /// The nil type (only value: nil).
    Nil,
    /// Boolean type.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// String type.
    String,
    /// Homogeneous vector type.
    Vec(Box<Type>),
    /// Homogeneous set type.
    Set(Box<Type>),
    /// Homogeneous map type.
    Map(Box<Type>, Box<Type>),
    /// Optional type (value or nil).
    Option(Box<Type>),
    /// Any type (accepts any value).
    Any,
}

impl Type {
    /// Creates a vector type with the given element type.
    #[must_use]
    pub fn vec(element: Type) -> Self {
        Self::Vec(Box::new(element))
    }

    /// Creates a set type with the given element type.
    #[must_use]
    pub fn set(element: Type) -> Self {
        Self::Set(Box::new(element))
    }

    /// Creates a map type with the given key and value types.
    #[must_use]
    pub fn map(key: Type, value: Type) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    /// Creates an optional type.
    #[must_use]
    pub fn option(inner: Type) -> Self {
        Self::Option(Box::new(inner))
    }

    /// Returns true if this type is `Any`.
    #[must_use]
    pub const fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Returns true if this type can be nil.
    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        matches!(self, Self::Nil | Self::Option(_) | Self::Any)
    }

    /// Checks if a value type is accepted by this type.
    ///
    /// `Any` accepts everything, `Option(T)` accepts nil and whatever `T`
    /// accepts, and `Float` accepts `Int` (numeric promotion). Collection
    /// types compare element types recursively.
    #[must_use]
    pub fn accepts(&self, value_type: &Type) -> bool {
        match (self, value_type) {
            (Self::Any, _) => true,
            (Self::Option(inner), actual) => {
                matches!(actual, Self::Nil) || inner.accepts(actual)
            }
            (Self::Nil, Self::Nil)
            | (Self::Bool, Self::Bool)
            | (Self::Int | Self::Float, Self::Int)
            | (Self::Float, Self::Float)
            | (Self::String, Self::String) => true,
            (Self::Vec(expected), Self::Vec(actual)) | (Self::Set(expected), Self::Set(actual)) => {
                actual.is_any() || expected.accepts(actual)
            }
            (Self::Map(ek, ev), Self::Map(ak, av)) => {
                (ak.is_any() && av.is_any()) || (ek.accepts(ak) && ev.accepts(av))
            }
            _ => false,
        }
    }

    /// Checks a concrete value against this type, inspecting collection
    /// elements.
    #[must_use]
    pub fn accepts_value(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Option(inner), v) => v.is_nil() || inner.accepts_value(v),
            (Self::Vec(elem), Value::Vec(items)) => items.iter().all(|v| elem.accepts_value(v)),
            (Self::Set(elem), Value::Set(items)) => items.iter().all(|v| elem.accepts_value(v)),
            (Self::Map(kt, vt), Value::Map(entries)) => entries
                .iter()
                .all(|(k, v)| kt.accepts_value(k) && vt.accepts_value(v)),
            (expected, v) => expected.accepts(&v.value_type()),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Vec(t) => write!(f, "vec<{t:?}>"),
            Self::Set(t) => write!(f, "set<{t:?}>"),
            Self::Map(k, v) => write!(f, "map<{k:?}, {v:?}>"),
            Self::Option(t) => write!(f, "option<{t:?}>"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
