//! Working-memory fact table.
//!
//! The `FactStore` owns every fact of a session, including the synthetic
//! facts produced inside the network. Host-visible facts are additionally
//! indexed by `(type, identity)`. All state lives in persistent maps, so
//! cloning the store is O(1) and serves as a rollback snapshot.

use std::sync::Arc;

use kestrel_foundation::{Error, FactId, Result, Value};

use crate::fact::{Fact, FactSource, FactType};
use crate::registry::TypeRegistry;

/// Table of facts with an identity index.
#[derive(Clone, Debug, Default)]
pub struct FactStore {
    facts: im::OrdMap<FactId, Arc<Fact>>,
    index: im::HashMap<(FactType, Value), FactId>,
    next_id: u64,
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> FactId {
        self.next_id += 1;
        FactId(self.next_id)
    }

    /// Inserts a host-visible fact.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFact` if a fact with the same identity is present,
    /// or a schema error if the value fails validation.
    pub fn insert(
        &mut self,
        registry: &TypeRegistry,
        fact_type: &FactType,
        value: Value,
        source: FactSource,
    ) -> Result<Arc<Fact>> {
        registry.validate(fact_type, &value)?;
        let identity = registry.identity_of(fact_type, &value)?;
        let key = (fact_type.clone(), identity.clone());
        if self.index.contains_key(&key) {
            return Err(Error::duplicate_fact(fact_type.name(), identity.to_string()));
        }
        let id = self.allocate();
        let fact = Arc::new(Fact {
            id,
            fact_type: fact_type.clone(),
            value,
            identity,
            source,
        });
        self.index.insert(key, id);
        self.facts.insert(id, Arc::clone(&fact));
        Ok(fact)
    }

    /// Inserts a network-internal fact. It gets an id but no identity entry.
    pub fn insert_synthetic(
        &mut self,
        fact_type: &FactType,
        value: Value,
        source: FactSource,
    ) -> Arc<Fact> {
        let id = self.allocate();
        let fact = Arc::new(Fact {
            id,
            fact_type: fact_type.clone(),
            identity: value.clone(),
            value,
            source,
        });
        self.facts.insert(id, Arc::clone(&fact));
        fact
    }

    /// Finds a host-visible fact by identity.
    #[must_use]
    pub fn find(&self, fact_type: &FactType, identity: &Value) -> Option<&Arc<Fact>> {
        self.index
            .get(&(fact_type.clone(), identity.clone()))
            .and_then(|id| self.facts.get(id))
    }

    /// Finds the live fact whose identity matches the given value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no such fact is present.
    pub fn resolve(
        &self,
        registry: &TypeRegistry,
        fact_type: &FactType,
        value: &Value,
    ) -> Result<Arc<Fact>> {
        let identity = registry.identity_of(fact_type, value)?;
        self.find(fact_type, &identity)
            .cloned()
            .ok_or_else(|| Error::unknown_fact(fact_type.name(), identity.to_string()))
    }

    /// Replaces the value (and source) of a fact, keeping its id.
    ///
    /// Returns the previous and the new fact.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if the id is not live, or `InvalidArgument` if the
    /// new value would change the identity of an indexed fact.
    pub fn replace(
        &mut self,
        registry: &TypeRegistry,
        id: FactId,
        value: Value,
        source: FactSource,
    ) -> Result<(Arc<Fact>, Arc<Fact>)> {
        let old = self
            .facts
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::unknown_fact("?", id.to_string()))?;
        let identity = if old.source.is_synthetic() {
            value.clone()
        } else {
            registry.validate(&old.fact_type, &value)?;
            let identity = registry.identity_of(&old.fact_type, &value)?;
            if identity != old.identity {
                return Err(Error::invalid_argument(format!(
                    "update of {} would change its identity",
                    old.fact_type
                )));
            }
            identity
        };
        let new = Arc::new(Fact {
            id,
            fact_type: old.fact_type.clone(),
            value,
            identity,
            source,
        });
        self.facts.insert(id, Arc::clone(&new));
        Ok((old, new))
    }

    /// Removes a fact.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if the id is not live.
    pub fn remove(&mut self, id: FactId) -> Result<Arc<Fact>> {
        let fact = self
            .facts
            .remove(&id)
            .ok_or_else(|| Error::unknown_fact("?", id.to_string()))?;
        if !fact.source.is_synthetic() {
            self.index
                .remove(&(fact.fact_type.clone(), fact.identity.clone()));
        }
        Ok(fact)
    }

    /// Gets any fact by id, synthetic ones included.
    #[must_use]
    pub fn get(&self, id: FactId) -> Option<&Arc<Fact>> {
        self.facts.get(&id)
    }

    /// Iterates host-visible facts in id order.
    pub fn facts(&self) -> impl Iterator<Item = &Arc<Fact>> + '_ {
        self.facts.values().filter(|f| !f.source.is_synthetic())
    }

    /// Returns host-visible facts of a type and all its subtypes, in id order.
    #[must_use]
    pub fn query(&self, registry: &TypeRegistry, fact_type: &FactType) -> Vec<Arc<Fact>> {
        self.facts()
            .filter(|f| registry.is_subtype(&f.fact_type, fact_type))
            .cloned()
            .collect()
    }

    /// Returns the number of host-visible facts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if no host-visible fact is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
