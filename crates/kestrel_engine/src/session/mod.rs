//! Sessions: working memory, propagation, and the firing loop.
//!
//! A session owns a fresh set of node memories over a shared compiled
//! network. Every public operation is a unit of work: the working memory is
//! snapshotted first and restored if the operation fails, so a failed insert,
//! update, retract, or firing leaves no trace.
//!
//! # Module Structure
//!
//! - `memory` - Persistent per-session node state
//! - `propagate` - Alpha, beta, aggregate, and terminal activations
//! - `context` - The [`RuleContext`](kestrel_language::RuleContext) handed to actions

mod context;
mod memory;
mod propagate;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{Error, ErrorKind, FactId, Result, SemanticLimit, TupleId, Value};
use kestrel_storage::{Fact, FactSource, FactType};
use tracing::{debug, trace, warn};

use crate::agenda::{Activation, ActivationKey};
use crate::config::SessionConfig;
use crate::events::{EngineEvent, EventHandler, ExpressionEvaluation, ExpressionFailure, FiringEvent};
use crate::linked::{LinkedBatch, QueuedLinked};
use crate::network::{Network, NetworkSchema};

use memory::WorkingMemory;
use propagate::Delta;

/// Session-wide predicate every activation must pass to be queued.
pub type AgendaFilter = Arc<dyn Fn(&Activation) -> bool + Send + Sync>;

/// Which failure event to raise.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    Lhs,
    Agenda,
    Rhs,
}

/// A rule session.
pub struct Session {
    network: Arc<Network>,
    config: SessionConfig,
    memory: WorkingMemory,
    handlers: Vec<EventHandler>,
    filters: Vec<AgendaFilter>,
    /// Agenda events held back during a bulk operation.
    deferred: Vec<EngineEvent>,
    bulk_depth: usize,
    halted: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("facts", &self.memory.store.len())
            .field("agenda", &self.memory.agenda.len())
            .field("handlers", &self.handlers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session and activates rules that match an empty working memory.
    pub(crate) fn new(network: Arc<Network>, config: SessionConfig) -> Result<Self> {
        let memory = WorkingMemory::new(network.root);
        let mut session = Self {
            network: Arc::clone(&network),
            config,
            memory,
            handlers: Vec::new(),
            filters: Vec::new(),
            deferred: Vec::new(),
            bulk_depth: 0,
            halted: false,
        };
        for &successor in &network.node(network.root).successors {
            session.left(&network, successor, TupleId::ROOT, Delta::Assert)?;
        }
        debug!(
            nodes = network.len(),
            queued = session.memory.agenda.len(),
            "session created"
        );
        Ok(session)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Describes the compiled network.
    #[must_use]
    pub fn schema(&self) -> NetworkSchema {
        self.network.schema()
    }

    /// Live facts of a type and its subtypes, linked facts included.
    #[must_use]
    pub fn query(&self, fact_type: impl Into<FactType>) -> Vec<Arc<Fact>> {
        self.memory
            .store
            .query(self.network.registry(), &fact_type.into())
    }

    /// Every live host-visible fact, in insertion order.
    #[must_use]
    pub fn facts(&self) -> Vec<Arc<Fact>> {
        self.memory.store.facts().cloned().collect()
    }

    /// The live fact with the same identity as `value`.
    #[must_use]
    pub fn find(&self, fact_type: impl Into<FactType>, value: &Value) -> Option<Arc<Fact>> {
        self.memory
            .store
            .resolve(self.network.registry(), &fact_type.into(), value)
            .ok()
    }

    /// Number of live host-visible facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.memory.store.len()
    }

    /// Queued activations in firing order.
    #[must_use]
    pub fn agenda(&self) -> Vec<Activation> {
        self.memory.agenda.pending().cloned().collect()
    }

    /// Number of queued activations.
    #[must_use]
    pub fn agenda_len(&self) -> usize {
        self.memory.agenda.len()
    }

    /// The fact a rule owns under `key`.
    #[must_use]
    pub fn linked_fact(&self, rule: &str, key: &Value) -> Option<Arc<Fact>> {
        let entry = self.memory.linked.get(&(Arc::from(rule), key.clone()))?;
        self.memory.store.get(entry.fact).cloned()
    }

    /// Number of queued linked-fact changes.
    #[must_use]
    pub fn queued_linked(&self) -> usize {
        self.memory.linked.queued()
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Registers an event handler. Handlers run in registration order.
    pub fn subscribe(&mut self, handler: impl FnMut(&mut EngineEvent) + Send + 'static) {
        self.handlers.push(Box::new(handler));
    }

    /// Adds a session-wide agenda filter.
    ///
    /// The filter applies to activations queued from now on.
    pub fn add_agenda_filter(
        &mut self,
        filter: impl Fn(&Activation) -> bool + Send + Sync + 'static,
    ) {
        self.filters.push(Arc::new(filter));
    }

    fn observed(&self) -> bool {
        !self.handlers.is_empty()
    }

    fn notify(&mut self, event: &mut EngineEvent) {
        for handler in &mut self.handlers {
            handler(event);
        }
    }

    fn publish(&mut self, event: EngineEvent) {
        if !self.observed() {
            return;
        }
        if self.bulk_depth > 0 && self.config.defer_bulk_agenda_events && event.is_agenda_event() {
            self.deferred.push(event);
            return;
        }
        let mut event = event;
        self.notify(&mut event);
    }

    /// Raises a failure event. Returns the error if no handler recovered it.
    fn report(&mut self, stage: Stage, failure: ExpressionFailure) -> Option<Error> {
        let mut event = match stage {
            Stage::Lhs => EngineEvent::LhsExpressionFailed(failure),
            Stage::Agenda => EngineEvent::AgendaExpressionFailed(failure),
            Stage::Rhs => EngineEvent::RhsExpressionFailed(failure),
        };
        self.notify(&mut event);
        match event {
            EngineEvent::LhsExpressionFailed(failure)
            | EngineEvent::AgendaExpressionFailed(failure)
            | EngineEvent::RhsExpressionFailed(failure) => {
                (!failure.handled).then_some(failure.error)
            }
            other => Some(Error::internal(format!(
                "failure event replaced by {}",
                other.name()
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Units of Work
    // -------------------------------------------------------------------------

    /// Runs `f` against a snapshot; restores the snapshot if it fails.
    fn transaction<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.memory.clone();
        let deferred = self.deferred.len();
        let result = f(self);
        if result.is_err() {
            self.memory = snapshot;
            self.deferred.truncate(deferred);
        }
        result
    }

    /// A transaction whose agenda events are delivered once it succeeds.
    fn bulk<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.bulk_depth += 1;
        let result = self.transaction(f);
        self.bulk_depth -= 1;
        if self.bulk_depth == 0 {
            let deferred = std::mem::take(&mut self.deferred);
            if result.is_ok() {
                for mut event in deferred {
                    self.notify(&mut event);
                }
            }
        }
        result
    }

    // -------------------------------------------------------------------------
    // Fact Operations
    // -------------------------------------------------------------------------

    /// Inserts a fact.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFact` if a fact with the same identity is live, a
    /// schema error if the value is invalid, or `LhsEvaluation` if a condition
    /// failed without a handler recovering it.
    pub fn insert(
        &mut self,
        fact_type: impl Into<FactType>,
        value: impl Into<Value>,
    ) -> Result<FactId> {
        let fact_type = fact_type.into();
        let value = value.into();
        self.transaction(|s| {
            let fact = s.insert_fact(fact_type, value, FactSource::Value)?;
            s.drain_linked()?;
            Ok(fact.id)
        })
    }

    /// Updates the fact with the same identity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no such fact is live, `InvalidArgument` for a
    /// linked fact, or a propagation failure.
    pub fn update(&mut self, fact_type: impl Into<FactType>, value: impl Into<Value>) -> Result<()> {
        let fact_type = fact_type.into();
        let value = value.into();
        self.transaction(|s| {
            s.update_value(&fact_type, value)?;
            s.drain_linked()
        })
    }

    /// Retracts the fact with the same identity.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if no such fact is live, `InvalidArgument` for a
    /// linked fact, or a propagation failure.
    pub fn retract(&mut self, fact_type: impl Into<FactType>, value: impl Into<Value>) -> Result<()> {
        let fact_type = fact_type.into();
        let value = value.into();
        self.transaction(|s| {
            s.retract_value(&fact_type, &value)?;
            s.drain_linked()
        })
    }

    /// Retracts the fact if it is live. Returns whether anything was retracted.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a linked fact, or a propagation failure.
    pub fn try_retract(
        &mut self,
        fact_type: impl Into<FactType>,
        value: impl Into<Value>,
    ) -> Result<bool> {
        match self.retract(fact_type, value) {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.kind, ErrorKind::UnknownFact { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Inserts a batch of facts.
    ///
    /// The whole batch is validated before anything is inserted; agenda
    /// events are delivered after the last insert.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFact` if an identity is live or repeats within the
    /// batch, or the first propagation failure (nothing is inserted then).
    pub fn insert_all<T: Into<FactType>>(
        &mut self,
        facts: impl IntoIterator<Item = (T, Value)>,
    ) -> Result<Vec<FactId>> {
        let facts: Vec<(FactType, Value)> =
            facts.into_iter().map(|(t, v)| (t.into(), v)).collect();
        let registry = self.network.registry();
        let mut seen = HashSet::new();
        for (fact_type, value) in &facts {
            registry.validate(fact_type, value)?;
            let identity = registry.identity_of(fact_type, value)?;
            if self.memory.store.find(fact_type, &identity).is_some()
                || !seen.insert((fact_type.clone(), identity.clone()))
            {
                return Err(Error::duplicate_fact(fact_type.name(), identity.to_string()));
            }
        }
        debug!(count = facts.len(), "bulk insert");
        self.bulk(|s| {
            let mut ids = Vec::with_capacity(facts.len());
            for (fact_type, value) in facts {
                ids.push(s.insert_fact(fact_type, value, FactSource::Value)?.id);
            }
            s.drain_linked()?;
            Ok(ids)
        })
    }

    /// Updates a batch of facts.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` or `InvalidArgument` if any target is missing
    /// or linked, or the first propagation failure (nothing is updated then).
    pub fn update_all<T: Into<FactType>>(
        &mut self,
        facts: impl IntoIterator<Item = (T, Value)>,
    ) -> Result<()> {
        let facts: Vec<(FactType, Value)> =
            facts.into_iter().map(|(t, v)| (t.into(), v)).collect();
        let registry = self.network.registry();
        for (fact_type, value) in &facts {
            registry.validate(fact_type, value)?;
            let fact = self.memory.store.resolve(registry, fact_type, value)?;
            reject_linked(&fact)?;
        }
        debug!(count = facts.len(), "bulk update");
        self.bulk(|s| {
            for (fact_type, value) in facts {
                s.update_value(&fact_type, value)?;
            }
            s.drain_linked()
        })
    }

    /// Retracts a batch of facts.
    ///
    /// # Errors
    ///
    /// Returns `UnknownFact` if any identity is not live or repeats within
    /// the batch, `InvalidArgument` for linked facts, or the first
    /// propagation failure (nothing is retracted then).
    pub fn retract_all<T: Into<FactType>>(
        &mut self,
        facts: impl IntoIterator<Item = (T, Value)>,
    ) -> Result<()> {
        let facts: Vec<(FactType, Value)> =
            facts.into_iter().map(|(t, v)| (t.into(), v)).collect();
        let registry = self.network.registry();
        let mut targets = Vec::with_capacity(facts.len());
        let mut seen = HashSet::new();
        for (fact_type, value) in &facts {
            let fact = self.memory.store.resolve(registry, fact_type, value)?;
            reject_linked(&fact)?;
            if !seen.insert(fact.id) {
                return Err(Error::unknown_fact(fact_type.name(), fact.identity.to_string()));
            }
            targets.push(fact);
        }
        debug!(count = targets.len(), "bulk retract");
        self.bulk(|s| {
            for fact in &targets {
                s.retract_fact(fact)?;
            }
            s.drain_linked()
        })
    }

    /// Inserts and propagates one fact.
    fn insert_fact(
        &mut self,
        fact_type: FactType,
        value: Value,
        source: FactSource,
    ) -> Result<Arc<Fact>> {
        let network = Arc::clone(&self.network);
        let registry = network.registry();
        registry.validate(&fact_type, &value)?;
        let identity = registry.identity_of(&fact_type, &value)?;
        if self.memory.store.find(&fact_type, &identity).is_some() {
            return Err(Error::duplicate_fact(fact_type.name(), identity.to_string()));
        }
        if self.observed() {
            self.publish(EngineEvent::FactInserting {
                fact_type: fact_type.clone(),
                value: value.clone(),
            });
        }
        let fact = self.memory.store.insert(registry, &fact_type, value, source)?;
        trace!(fact = %fact, "insert");
        self.alpha_assert(&network, &fact)?;
        self.publish(EngineEvent::FactInserted {
            fact: Arc::clone(&fact),
        });
        Ok(fact)
    }

    /// Resolves a host fact by identity and updates it.
    fn update_value(&mut self, fact_type: &FactType, value: Value) -> Result<()> {
        let fact = self
            .memory
            .store
            .resolve(self.network.registry(), fact_type, &value)?;
        reject_linked(&fact)?;
        self.update_fact(&fact, value, FactSource::Value)?;
        Ok(())
    }

    /// Resolves a host fact by identity and retracts it.
    fn retract_value(&mut self, fact_type: &FactType, value: &Value) -> Result<()> {
        let fact = self
            .memory
            .store
            .resolve(self.network.registry(), fact_type, value)?;
        reject_linked(&fact)?;
        self.retract_fact(&fact)
    }

    fn update_fact(
        &mut self,
        fact: &Arc<Fact>,
        value: Value,
        source: FactSource,
    ) -> Result<Arc<Fact>> {
        let network = Arc::clone(&self.network);
        network.registry().validate(&fact.fact_type, &value)?;
        if self.observed() {
            self.publish(EngineEvent::FactUpdating {
                fact: Arc::clone(fact),
                value: value.clone(),
            });
        }
        let (previous, fact) = self
            .memory
            .store
            .replace(network.registry(), fact.id, value, source)?;
        trace!(fact = %fact, "update");
        self.alpha_modify(&network, &fact)?;
        self.publish(EngineEvent::FactUpdated {
            previous,
            fact: Arc::clone(&fact),
        });
        Ok(fact)
    }

    fn retract_fact(&mut self, fact: &Arc<Fact>) -> Result<()> {
        let network = Arc::clone(&self.network);
        self.publish(EngineEvent::FactRetracting {
            fact: Arc::clone(fact),
        });
        trace!(fact = %fact, "retract");
        self.alpha_retract(&network, fact)?;
        let fact = self.memory.store.remove(fact.id)?;
        self.publish(EngineEvent::FactRetracted { fact });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Linked Facts
    // -------------------------------------------------------------------------

    /// Retracts linked facts that lost their last source, until none remain.
    fn drain_linked(&mut self) -> Result<()> {
        loop {
            let orphans = self.memory.linked.take_orphans();
            if orphans.is_empty() {
                return Ok(());
            }
            for key in orphans {
                let Some(entry) = self.memory.linked.remove(&key) else {
                    continue;
                };
                if let Some(fact) = self.memory.store.get(entry.fact).cloned() {
                    trace!(rule = %key.0, key = %key.1, "retracting orphaned linked fact");
                    self.retract_fact(&fact)?;
                }
            }
        }
    }

    /// Applies the queued linked-fact changes.
    ///
    /// Consecutive changes with the same action form one batch and one
    /// propagation pass.
    ///
    /// # Errors
    ///
    /// Returns the first failure; every queued change is rolled back then.
    pub fn propagate_linked(&mut self) -> Result<Vec<LinkedBatch>> {
        self.transaction(|s| {
            let queue = s.memory.linked.take_queue();
            let mut batches: Vec<LinkedBatch> = Vec::new();
            for change in queue {
                let action = change.action();
                match batches.last_mut() {
                    Some(batch) if batch.action == action => batch.fact_count += 1,
                    previous => {
                        // The previous group's pass ends before this one starts.
                        if previous.is_some() {
                            s.drain_linked()?;
                        }
                        batches.push(LinkedBatch {
                            action,
                            fact_count: 1,
                        });
                    }
                }
                s.apply_queued(change)?;
            }
            s.drain_linked()?;
            debug!(batches = batches.len(), "propagated linked facts");
            Ok(batches)
        })
    }

    /// Alias of [`propagate_linked`](Self::propagate_linked).
    ///
    /// # Errors
    ///
    /// See [`propagate_linked`](Self::propagate_linked).
    pub fn propagate_chained(&mut self) -> Result<Vec<LinkedBatch>> {
        self.propagate_linked()
    }

    fn apply_queued(&mut self, change: QueuedLinked) -> Result<()> {
        match change {
            QueuedLinked::Upsert {
                key,
                source,
                parents,
                fact_type,
                value,
            } => {
                // The activation may have left the agenda since the change was queued.
                let source = source.filter(|s| self.memory.agenda.get(s).is_some());
                self.upsert_linked(key, source, parents, fact_type, value)
            }
            QueuedLinked::Update {
                key,
                parents,
                value,
            } => self.update_linked(&key, parents, value),
            QueuedLinked::Retract { key } => self.retract_linked(&key),
        }
    }

    // -------------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------------

    /// Fires activations until the agenda is empty or an action halts.
    ///
    /// Returns the number of firings.
    ///
    /// # Errors
    ///
    /// Returns `RhsEvaluation` if an action fails without a handler
    /// recovering it (the activation stays queued), `AgendaEvaluation` if a
    /// dynamic priority fails when re-evaluated before a pop, or
    /// `LimitExceeded` when the configured firing limit is hit.
    pub fn fire(&mut self) -> Result<usize> {
        self.fire_until(usize::MAX)
    }

    /// Fires at most `max` activations.
    ///
    /// # Errors
    ///
    /// See [`fire`](Self::fire).
    pub fn fire_until(&mut self, max: usize) -> Result<usize> {
        self.halted = false;
        let mut firings = 0;
        while firings < max {
            self.rescore_agenda()?;
            let Some(key) = self.memory.agenda.peek() else {
                break;
            };
            if let Some(limit) = self.config.max_firings {
                if firings >= limit {
                    let context = self.memory.agenda.get(&key).map(|a| a.rule.to_string());
                    warn!(limit, rule = ?context, "firing limit exceeded");
                    return Err(Error::limit_exceeded(SemanticLimit::MaxFirings { limit, context }));
                }
            }
            self.fire_one(key)?;
            firings += 1;
            if self.halted {
                self.halted = false;
                debug!(firings, "halted");
                self.publish(EngineEvent::FireHalted { firings });
                break;
            }
        }
        debug!(firings, queued = self.memory.agenda.len(), "fire complete");
        Ok(firings)
    }

    fn fire_one(&mut self, key: ActivationKey) -> Result<()> {
        let network = Arc::clone(&self.network);
        let Some(activation) = self.memory.agenda.get(&key).cloned() else {
            return Ok(());
        };
        let trigger = activation.state.trigger();
        let snapshot = self.memory.clone();
        let deferred = self.deferred.len();
        debug!(rule = %activation.rule, state = ?activation.state, "firing");
        if self.observed() {
            self.publish(EngineEvent::RuleFiring(FiringEvent {
                rule: Arc::clone(&activation.rule),
                trigger,
                facts: activation.facts.clone(),
            }));
        }
        self.memory.agenda.consume(&key);

        let outcome = self.run_actions(&network, &activation);
        match outcome {
            Ok(()) => {
                if self.observed() {
                    self.publish(EngineEvent::RuleFired(FiringEvent {
                        rule: Arc::clone(&activation.rule),
                        trigger,
                        facts: activation.facts.clone(),
                    }));
                }
                Ok(())
            }
            Err((expression, error)) => {
                self.memory = snapshot;
                self.deferred.truncate(deferred);
                let failure = ExpressionFailure {
                    rule: Some(Arc::clone(&activation.rule)),
                    expression,
                    facts: activation.facts.clone(),
                    error,
                    handled: false,
                };
                match self.report(Stage::Rhs, failure) {
                    None => {
                        debug!(rule = %activation.rule, "action failure handled");
                        self.memory.agenda.skip(&key);
                        Ok(())
                    }
                    Some(error) => {
                        warn!(rule = %activation.rule, %error, "action failed");
                        Err(Error::rhs_evaluation(&*activation.rule, error))
                    }
                }
            }
        }
    }

    /// Runs the actions of a consumed activation, then drains linked facts.
    ///
    /// On failure returns the label of the failing step with its error.
    fn run_actions(
        &mut self,
        network: &Arc<Network>,
        activation: &Activation,
    ) -> std::result::Result<(), (Arc<str>, Error)> {
        let terminal = network.terminal(activation.key.terminal);
        let trigger = activation.state.trigger();
        let mut context = context::FiringContext::new(self, Arc::clone(network), activation);
        for (index, action) in terminal.rule.actions.iter().enumerate() {
            if !action.trigger.contains(trigger) {
                continue;
            }
            let label: Arc<str> = Arc::from(format!("{}[{index}]", terminal.rule.name));
            (action.action)(&mut context).map_err(|e| (Arc::clone(&label), e))?;
            context.action_completed(label);
        }
        drop(context);
        self.drain_linked()
            .map_err(|e| (Arc::from("linked fact retraction"), e))
    }

    fn action_evaluated(&mut self, activation: &Activation, expression: Arc<str>) {
        if self.config.emit_evaluation_events && self.observed() {
            self.publish(EngineEvent::RhsExpressionEvaluated(ExpressionEvaluation {
                rule: Some(Arc::clone(&activation.rule)),
                expression,
                facts: activation.facts.clone(),
                result: Value::Nil,
            }));
        }
    }
}

fn reject_linked(fact: &Fact) -> Result<()> {
    if fact.source.is_linked() {
        return Err(Error::invalid_argument(format!(
            "{} is owned by a rule and can only change through it",
            fact.fact_type
        )));
    }
    Ok(())
}
