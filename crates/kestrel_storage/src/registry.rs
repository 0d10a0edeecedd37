//! Registry of fact schemas.

use std::collections::{HashMap, HashSet};

use kestrel_foundation::{Error, Result, Value};

use crate::fact::FactType;
use crate::schema::FactSchema;

/// Registry of fact schemas keyed by type name.
///
/// Types without a registered schema use whole-value identity, have no
/// supertypes, and are not validated.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    schemas: HashMap<FactType, FactSchema>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a schema for the type already exists.
    pub fn register(&mut self, schema: FactSchema) -> Result<()> {
        if self.schemas.contains_key(&schema.name) {
            return Err(Error::invalid_argument(format!(
                "schema for fact type {} already registered",
                schema.name
            )));
        }
        self.schemas.insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Returns the schema for a type, if registered.
    #[must_use]
    pub fn schema(&self, fact_type: &FactType) -> Option<&FactSchema> {
        self.schemas.get(fact_type)
    }

    /// Returns the number of registered schemas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if no schema is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Computes the identity of a value of the given type.
    ///
    /// # Errors
    ///
    /// Propagates identity extraction failures from the schema.
    pub fn identity_of(&self, fact_type: &FactType, value: &Value) -> Result<Value> {
        match self.schemas.get(fact_type) {
            Some(schema) => schema.identity_of(value),
            None => Ok(value.clone()),
        }
    }

    /// Validates a value of the given type.
    ///
    /// # Errors
    ///
    /// Propagates field validation failures from the schema.
    pub fn validate(&self, fact_type: &FactType, value: &Value) -> Result<()> {
        match self.schemas.get(fact_type) {
            Some(schema) => schema.validate(value),
            None => Ok(()),
        }
    }

    /// Returns the type itself followed by all transitive supertypes.
    #[must_use]
    pub fn declared_types(&self, fact_type: &FactType) -> Vec<FactType> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![fact_type.clone()];
        while let Some(t) = stack.pop() {
            if !seen.insert(t.clone()) {
                continue;
            }
            if let Some(schema) = self.schemas.get(&t) {
                stack.extend(schema.supertypes.iter().rev().cloned());
            }
            out.push(t);
        }
        out
    }

    /// Returns true if facts of `sub` are visible as `sup`.
    #[must_use]
    pub fn is_subtype(&self, sub: &FactType, sup: &FactType) -> bool {
        sub == sup || self.declared_types(sub).contains(sup)
    }
}
