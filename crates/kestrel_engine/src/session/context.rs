//! The rule context handed to actions, and linked-fact mutation.

use std::sync::Arc;

use kestrel_foundation::{Error, ErrorKind, FactId, Result, Value};
use kestrel_language::{ActionTrigger, RuleContext};
use kestrel_storage::{Fact, FactSource, FactType};
use tracing::trace;

use super::Session;
use crate::agenda::{Activation, ActivationKey};
use crate::linked::{LinkedKey, QueuedLinked};
use crate::network::Network;

/// Engine services for one firing.
pub(super) struct FiringContext<'a> {
    session: &'a mut Session,
    network: Arc<Network>,
    activation: &'a Activation,
    trigger: ActionTrigger,
    parents: Arc<[FactId]>,
}

impl<'a> FiringContext<'a> {
    pub(super) fn new(
        session: &'a mut Session,
        network: Arc<Network>,
        activation: &'a Activation,
    ) -> Self {
        let parents: Arc<[FactId]> = activation.facts.iter().map(|f| f.id).collect();
        Self {
            session,
            network,
            activation,
            trigger: activation.state.trigger(),
            parents,
        }
    }

    pub(super) fn action_completed(&mut self, label: Arc<str>) {
        self.session.action_evaluated(self.activation, label);
    }

    fn key(&self, key: Value) -> LinkedKey {
        (Arc::clone(&self.activation.rule), key)
    }

    /// A deactivation firing never keeps the facts it upserts alive.
    fn source(&self) -> Option<ActivationKey> {
        (self.trigger != ActionTrigger::DEACTIVATED).then_some(self.activation.key)
    }
}

impl RuleContext for FiringContext<'_> {
    fn rule_name(&self) -> &str {
        &self.activation.rule
    }

    fn trigger(&self) -> ActionTrigger {
        self.trigger
    }

    fn get(&self, declaration: &str) -> Option<&Value> {
        let terminal = self.network.terminal(self.activation.key.terminal);
        let position = terminal
            .declarations
            .iter()
            .position(|d| &**d == declaration)?;
        self.activation.facts.get(position).map(|f| &f.value)
    }

    fn insert(&mut self, fact_type: FactType, value: Value) -> Result<()> {
        self.session.insert_fact(fact_type, value, FactSource::Value)?;
        Ok(())
    }

    fn update(&mut self, fact_type: FactType, value: Value) -> Result<()> {
        self.session.update_value(&fact_type, value)
    }

    fn retract(&mut self, fact_type: FactType, value: Value) -> Result<()> {
        self.session.retract_value(&fact_type, &value)
    }

    fn try_retract(&mut self, fact_type: FactType, value: Value) -> Result<bool> {
        match self.session.retract_value(&fact_type, &value) {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.kind, ErrorKind::UnknownFact { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn insert_linked(&mut self, key: Value, fact_type: FactType, value: Value) -> Result<()> {
        let key = self.key(key);
        let source = self.source();
        let parents = Arc::clone(&self.parents);
        self.session
            .upsert_linked(key, source, parents, fact_type, value)
    }

    fn update_linked(&mut self, key: Value, value: Value) -> Result<()> {
        let key = self.key(key);
        let parents = Arc::clone(&self.parents);
        self.session.update_linked(&key, parents, value)
    }

    fn retract_linked(&mut self, key: Value) -> Result<()> {
        let key = self.key(key);
        self.session.retract_linked(&key)
    }

    fn queue_insert_linked(&mut self, key: Value, fact_type: FactType, value: Value) {
        let change = QueuedLinked::Upsert {
            key: self.key(key),
            source: self.source(),
            parents: Arc::clone(&self.parents),
            fact_type,
            value,
        };
        self.session.memory.linked.enqueue(change);
    }

    fn queue_update_linked(&mut self, key: Value, value: Value) {
        let change = QueuedLinked::Update {
            key: self.key(key),
            parents: Arc::clone(&self.parents),
            value,
        };
        self.session.memory.linked.enqueue(change);
    }

    fn queue_retract_linked(&mut self, key: Value) {
        let change = QueuedLinked::Retract { key: self.key(key) };
        self.session.memory.linked.enqueue(change);
    }

    fn linked(&self, key: &Value) -> Option<Value> {
        self.session
            .linked_fact(&self.activation.rule, key)
            .map(|f| f.value.clone())
    }

    fn halt(&mut self) {
        trace!(rule = %self.activation.rule, "halt requested");
        self.session.halted = true;
    }
}

// =============================================================================
// Linked Fact Mutation
// =============================================================================

impl Session {
    fn linked_entry_fact(&self, key: &LinkedKey) -> Result<(FactType, Arc<Fact>)> {
        let missing = || Error::unknown_fact(format!("linked:{}", key.0), key.1.to_string());
        let entry = self.memory.linked.get(key).ok_or_else(missing)?;
        let fact = self.memory.store.get(entry.fact).cloned().ok_or_else(missing)?;
        Ok((entry.fact_type.clone(), fact))
    }

    /// Inserts the linked fact, or updates it when the key is present.
    ///
    /// A change of type or identity replaces the fact; the entry keeps its
    /// sources.
    pub(super) fn upsert_linked(
        &mut self,
        key: LinkedKey,
        source: Option<ActivationKey>,
        parents: Arc<[FactId]>,
        fact_type: FactType,
        value: Value,
    ) -> Result<()> {
        let linked_source = FactSource::Linked {
            rule: Arc::clone(&key.0),
            key: key.1.clone(),
            parents,
        };
        if self.memory.linked.get(&key).is_some() {
            let (current_type, fact) = self.linked_entry_fact(&key)?;
            let identity = self.network.registry().identity_of(&fact_type, &value)?;
            if current_type == fact_type && fact.identity == identity {
                self.update_fact(&fact, value, linked_source)?;
                if let Some(source) = source {
                    self.memory.linked.add_source(&key, source);
                }
                return Ok(());
            }
            let sources = self
                .memory
                .linked
                .remove(&key)
                .map(|entry| entry.sources)
                .unwrap_or_default();
            trace!(rule = %key.0, key = %key.1, "replacing linked fact");
            self.retract_fact(&fact)?;
            let fact = self.insert_fact(fact_type.clone(), value, linked_source)?;
            self.memory
                .linked
                .insert(key.clone(), fact.id, fact_type, source);
            for previous in sources {
                self.memory.linked.add_source(&key, previous);
            }
            return Ok(());
        }
        let fact = self.insert_fact(fact_type.clone(), value, linked_source)?;
        trace!(rule = %key.0, key = %key.1, fact = %fact, "linked fact inserted");
        self.memory.linked.insert(key, fact.id, fact_type, source);
        Ok(())
    }

    pub(super) fn update_linked(
        &mut self,
        key: &LinkedKey,
        parents: Arc<[FactId]>,
        value: Value,
    ) -> Result<()> {
        let (_, fact) = self.linked_entry_fact(key)?;
        let source = FactSource::Linked {
            rule: Arc::clone(&key.0),
            key: key.1.clone(),
            parents,
        };
        self.update_fact(&fact, value, source)?;
        Ok(())
    }

    pub(super) fn retract_linked(&mut self, key: &LinkedKey) -> Result<()> {
        let (_, fact) = self.linked_entry_fact(key)?;
        self.memory.linked.remove(key);
        self.retract_fact(&fact)
    }
}
