//! Facts and fact types.

use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{FactId, Value};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Name of a fact type.
///
/// Cheap to clone and compare. Types are nominal: two facts share a type
/// exactly when their type names are equal.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactType(Arc<str>);

impl FactType {
    /// Creates a fact type with the given name.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactType({})", self.0)
    }
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FactType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FactType {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Where a fact came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FactSource {
    /// Inserted by the host application.
    Value,
    /// Produced by a rule action through the linked-fact API.
    Linked {
        /// Rule that owns the fact.
        rule: Arc<str>,
        /// Key the rule used for the fact.
        key: Value,
        /// Facts of the activation that last upserted it.
        parents: Arc<[FactId]>,
    },
    /// Result of an aggregation (network-internal).
    Aggregate {
        /// Facts that contributed to the result.
        parents: Arc<[FactId]>,
    },
    /// Result of a binding expression (network-internal).
    Binding,
}

impl FactSource {
    /// Returns true for network-internal facts that never enter the store index.
    #[must_use]
    pub const fn is_synthetic(&self) -> bool {
        matches!(self, Self::Aggregate { .. } | Self::Binding)
    }

    /// Returns true for facts owned by a rule.
    #[must_use]
    pub const fn is_linked(&self) -> bool {
        matches!(self, Self::Linked { .. })
    }
}

/// A fact in working memory.
#[derive(Clone, Debug, PartialEq)]
pub struct Fact {
    /// Session-unique id.
    pub id: FactId,
    /// Concrete type of the fact.
    pub fact_type: FactType,
    /// Payload.
    pub value: Value,
    /// Identity computed by the type's schema.
    pub identity: Value,
    /// Origin of the fact.
    pub source: FactSource,
}

impl Fact {
    /// Reads a field of the fact's value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} {}", self.fact_type, self.id.index(), self.value)
    }
}
