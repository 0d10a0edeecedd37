//! Alpha, beta, aggregate, and terminal activations.
//!
//! Every beta operator reacts to three left deltas (tuple asserted, modified,
//! retracted) and, except bindings, the same three right deltas (fact
//! asserted, modified, retracted). Output tuples go to the operator's beta
//! memory via [`Session::emit`], which fans them out to the memory's
//! successors; terminals turn them into agenda records.

use std::sync::Arc;

use im::{OrdMap, OrdSet};
use kestrel_foundation::{Error, FactId, Result, TupleId, Type, Value};
use kestrel_language::{ActionTrigger, CompiledExpr, Env, Repeatability};
use kestrel_storage::{Fact, FactSource, FactType};
use tracing::{trace, warn};

use super::memory::{AggregateState, ResultEntry};
use super::{Session, Stage};
use crate::agenda::{Activation, ActivationKey, ActivationState};
use crate::aggregate::{AggregateInput, AggregationAction, AggregationResult};
use crate::events::{ActivationEvent, EngineEvent, ExpressionEvaluation, ExpressionFailure};
use crate::network::{
    AggregateSpec, BetaInput, CompiledFilter, CompiledPriority, Network, NodeId, Op, Terminal,
};

/// Type of the synthetic facts carrying binding values.
const BINDING_TYPE: &str = "Binding";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum Delta {
    Assert,
    Modify,
    Retract,
}

impl Session {
    // =========================================================================
    // Evaluation
    // =========================================================================

    fn tuple_facts(&self, tuple: TupleId) -> Vec<Arc<Fact>> {
        self.memory
            .chain(tuple)
            .into_iter()
            .filter_map(|id| self.memory.store.get(id).cloned())
            .collect()
    }

    fn tuple_values(&self, tuple: TupleId) -> Vec<Value> {
        self.memory
            .chain(tuple)
            .into_iter()
            .filter_map(|id| self.memory.store.get(id).map(|f| f.value.clone()))
            .collect()
    }

    fn evaluated_facts(&self, subject: Option<&Arc<Fact>>, tuple: Option<TupleId>) -> Vec<Arc<Fact>> {
        let mut facts = tuple.map(|t| self.tuple_facts(t)).unwrap_or_default();
        facts.extend(subject.cloned());
        facts
    }

    /// Evaluates a left-hand side expression.
    ///
    /// A failure a handler recovers is `Ok(None)`, which callers treat as a
    /// non-match.
    fn eval_lhs(
        &mut self,
        network: &Network,
        node: NodeId,
        expr: &CompiledExpr,
        subject: Option<&Arc<Fact>>,
        tuple: Option<TupleId>,
    ) -> Result<Option<Value>> {
        let slots = tuple.map(|t| self.tuple_values(t)).unwrap_or_default();
        let env = Env {
            subject: subject.map(|f| &f.value),
            slots: &slots,
        };
        let rules = &network.node(node).rules;
        match expr.eval(&env) {
            Ok(value) => {
                if self.config.emit_evaluation_events && self.observed() {
                    let facts = self.evaluated_facts(subject, tuple);
                    self.publish(EngineEvent::LhsExpressionEvaluated(ExpressionEvaluation {
                        rule: rules.first().cloned(),
                        expression: Arc::from(expr.label()),
                        facts,
                        result: value.clone(),
                    }));
                }
                Ok(Some(value))
            }
            Err(error) => {
                let failure = ExpressionFailure {
                    rule: rules.first().cloned(),
                    expression: Arc::from(expr.label()),
                    facts: self.evaluated_facts(subject, tuple),
                    error,
                    handled: false,
                };
                match self.report(Stage::Lhs, failure) {
                    None => {
                        trace!(node = %node, expression = expr.label(), "condition failure handled");
                        Ok(None)
                    }
                    Some(error) => {
                        let rules = rules.join(", ");
                        warn!(rule = %rules, expression = expr.label(), %error, "condition failed");
                        Err(Error::lhs_evaluation(rules, expr.label(), error))
                    }
                }
            }
        }
    }

    fn test_all(
        &mut self,
        network: &Network,
        node: NodeId,
        conditions: &[CompiledExpr],
        subject: Option<&Arc<Fact>>,
        tuple: Option<TupleId>,
    ) -> Result<bool> {
        for condition in conditions {
            let value = self.eval_lhs(network, node, condition, subject, tuple)?;
            if !value.is_some_and(|v| v.is_truthy()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluates a filter or priority expression.
    fn eval_agenda(
        &mut self,
        terminal: &Terminal,
        expr: &CompiledExpr,
        facts: &[Arc<Fact>],
    ) -> Result<Option<Value>> {
        let slots: Vec<Value> = facts.iter().map(|f| f.value.clone()).collect();
        match expr.eval(&Env::tuple(&slots)) {
            Ok(value) => {
                if self.config.emit_evaluation_events && self.observed() {
                    self.publish(EngineEvent::AgendaExpressionEvaluated(ExpressionEvaluation {
                        rule: Some(Arc::clone(&terminal.rule.name)),
                        expression: Arc::from(expr.label()),
                        facts: facts.to_vec(),
                        result: value.clone(),
                    }));
                }
                Ok(Some(value))
            }
            Err(error) => {
                self.agenda_failure(terminal, expr, facts, error)?;
                Ok(None)
            }
        }
    }

    /// Reports an agenda expression failure; `Ok` when a handler recovered it.
    fn agenda_failure(
        &mut self,
        terminal: &Terminal,
        expr: &CompiledExpr,
        facts: &[Arc<Fact>],
        error: Error,
    ) -> Result<()> {
        let failure = ExpressionFailure {
            rule: Some(Arc::clone(&terminal.rule.name)),
            expression: Arc::from(expr.label()),
            facts: facts.to_vec(),
            error,
            handled: false,
        };
        match self.report(Stage::Agenda, failure) {
            None => Ok(()),
            Some(error) => {
                warn!(rule = %terminal.rule.name, expression = expr.label(), %error, "agenda expression failed");
                Err(Error::agenda_evaluation(&*terminal.rule.name, expr.label(), error))
            }
        }
    }

    // =========================================================================
    // Alpha Network
    // =========================================================================

    /// Alpha memories whose selection chain accepts the fact.
    fn reach(&mut self, network: &Network, fact: &Arc<Fact>) -> Result<Vec<NodeId>> {
        let registry = network.registry();
        let mut stack: Vec<NodeId> = registry
            .declared_types(&fact.fact_type)
            .iter()
            .filter_map(|t| network.type_nodes.get(t).copied())
            .collect();
        let mut reached = Vec::new();
        while let Some(id) = stack.pop() {
            let node = network.node(id);
            match &node.op {
                Op::Type(_) => stack.extend(node.successors.iter().rev()),
                Op::Selection(condition) => {
                    if self.test_all(network, id, std::slice::from_ref(condition), Some(fact), None)? {
                        stack.extend(node.successors.iter().rev());
                    }
                }
                Op::AlphaMemory => reached.push(id),
                _ => {}
            }
        }
        reached.sort_unstable();
        reached.dedup();
        Ok(reached)
    }

    pub(super) fn alpha_assert(&mut self, network: &Network, fact: &Arc<Fact>) -> Result<()> {
        for memory in self.reach(network, fact)? {
            self.alpha_enter(network, memory, fact.id)?;
        }
        Ok(())
    }

    pub(super) fn alpha_modify(&mut self, network: &Network, fact: &Arc<Fact>) -> Result<()> {
        let now = self.reach(network, fact)?;
        let was: Vec<NodeId> = network
            .alpha_memories_for(&fact.fact_type)
            .into_iter()
            .filter(|m| self.memory.alpha_contains(*m, fact.id))
            .collect();
        for &memory in was.iter().filter(|m| !now.contains(m)) {
            self.alpha_leave(network, memory, fact.id)?;
        }
        for &memory in was.iter().filter(|m| now.contains(m)) {
            for &successor in &network.node(memory).successors {
                self.right(network, successor, fact.id, Delta::Modify)?;
            }
        }
        for &memory in now.iter().filter(|m| !was.contains(m)) {
            self.alpha_enter(network, memory, fact.id)?;
        }
        Ok(())
    }

    pub(super) fn alpha_retract(&mut self, network: &Network, fact: &Arc<Fact>) -> Result<()> {
        for memory in network.alpha_memories_for(&fact.fact_type) {
            if self.memory.alpha_contains(memory, fact.id) {
                self.alpha_leave(network, memory, fact.id)?;
            }
        }
        Ok(())
    }

    fn alpha_enter(&mut self, network: &Network, memory: NodeId, fact: FactId) -> Result<()> {
        self.memory
            .alpha
            .entry(memory)
            .or_insert_with(OrdSet::new)
            .insert(fact);
        for &successor in &network.node(memory).successors {
            self.right(network, successor, fact, Delta::Assert)?;
        }
        Ok(())
    }

    fn alpha_leave(&mut self, network: &Network, memory: NodeId, fact: FactId) -> Result<()> {
        if let Some(facts) = self.memory.alpha.get_mut(&memory) {
            facts.remove(&fact);
        }
        for &successor in &network.node(memory).successors {
            self.right(network, successor, fact, Delta::Retract)?;
        }
        Ok(())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Left activation of a beta operator or terminal.
    pub(super) fn left(
        &mut self,
        network: &Network,
        node: NodeId,
        tuple: TupleId,
        delta: Delta,
    ) -> Result<()> {
        match &network.node(node).op {
            Op::Join(input) => self.join_left(network, node, input, tuple, delta),
            Op::Not(input) => self.quantifier_left(network, node, input, tuple, delta, false),
            Op::Exists(input) => self.quantifier_left(network, node, input, tuple, delta, true),
            Op::Binding { expr, .. } => self.binding_left(network, node, expr, tuple, delta),
            Op::Aggregate { input, spec } => {
                self.aggregate_left(network, node, input, spec, tuple, delta)
            }
            Op::Terminal(index) => self.terminal(network, *index, tuple, delta),
            _ => Ok(()),
        }
    }

    /// Right activation of a beta operator.
    fn right(&mut self, network: &Network, node: NodeId, fact: FactId, delta: Delta) -> Result<()> {
        match &network.node(node).op {
            Op::Join(input) => self.join_right(network, node, input, fact, delta),
            Op::Not(input) => self.quantifier_right(network, node, input, fact, delta, false),
            Op::Exists(input) => self.quantifier_right(network, node, input, fact, delta, true),
            Op::Aggregate { input, spec } => {
                self.aggregate_right(network, node, input, spec, fact, delta)
            }
            _ => Ok(()),
        }
    }

    /// Sends an operator's output tuple through its beta memory.
    fn emit(&mut self, network: &Network, operator: NodeId, tuple: TupleId, delta: Delta) -> Result<()> {
        let Some(memory) = network.node(operator).memory else {
            return Ok(());
        };
        match delta {
            Delta::Assert => {
                self.memory
                    .beta
                    .entry(memory)
                    .or_insert_with(OrdSet::new)
                    .insert(tuple);
            }
            Delta::Retract => {
                if let Some(tuples) = self.memory.beta.get_mut(&memory) {
                    tuples.remove(&tuple);
                }
            }
            Delta::Modify => {}
        }
        for &successor in &network.node(memory).successors {
            self.left(network, successor, tuple, delta)?;
        }
        if delta == Delta::Retract {
            self.memory.tuples.remove(&tuple);
        }
        Ok(())
    }

    // =========================================================================
    // Join
    // =========================================================================

    fn join_left(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        tuple: TupleId,
        delta: Delta,
    ) -> Result<()> {
        if delta == Delta::Retract {
            for child in self.memory.take_join_children_of_left(node, tuple) {
                self.emit(network, node, child, Delta::Retract)?;
            }
            return Ok(());
        }
        for fact in self.memory.alpha_facts(input.right) {
            self.join_pair(network, node, input, tuple, fact, delta)?;
        }
        Ok(())
    }

    fn join_right(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        fact: FactId,
        delta: Delta,
    ) -> Result<()> {
        if delta == Delta::Retract {
            for child in self.memory.take_join_children_of_right(node, fact) {
                self.emit(network, node, child, Delta::Retract)?;
            }
            return Ok(());
        }
        for tuple in self.memory.beta_tuples(input.left) {
            self.join_pair(network, node, input, tuple, fact, delta)?;
        }
        Ok(())
    }

    /// Re-evaluates one (tuple, fact) pair and brings its child up to date.
    fn join_pair(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        tuple: TupleId,
        fact: FactId,
        delta: Delta,
    ) -> Result<()> {
        let existing = self.memory.join_children.get(&(node, tuple, fact)).copied();
        // A self-join sees a new fact from both sides; the first one wins.
        if delta == Delta::Assert && existing.is_some() {
            return Ok(());
        }
        let Some(subject) = self.memory.store.get(fact).cloned() else {
            return Ok(());
        };
        let matched = self.test_all(network, node, &input.conditions, Some(&subject), Some(tuple))?;
        match (matched, existing) {
            (true, Some(child)) => self.emit(network, node, child, Delta::Modify),
            (true, None) => {
                let child = self.memory.extend(tuple, Some(fact));
                self.memory.link_join_child(node, tuple, fact, child);
                self.emit(network, node, child, Delta::Assert)
            }
            (false, Some(child)) => {
                self.memory.unlink_join_child(node, tuple, fact);
                self.emit(network, node, child, Delta::Retract)
            }
            (false, None) => Ok(()),
        }
    }

    // =========================================================================
    // Not / Exists
    // =========================================================================

    fn quantifier_left(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        tuple: TupleId,
        delta: Delta,
        exists: bool,
    ) -> Result<()> {
        let key = (node, tuple);
        if delta == Delta::Retract {
            self.memory.matches.remove(&key);
            if let Some(child) = self.memory.single_children.remove(&key) {
                self.emit(network, node, child, Delta::Retract)?;
            }
            return Ok(());
        }
        let mut matched = OrdSet::new();
        for fact in self.memory.alpha_facts(input.right) {
            let Some(subject) = self.memory.store.get(fact).cloned() else {
                continue;
            };
            if self.test_all(network, node, &input.conditions, Some(&subject), Some(tuple))? {
                matched.insert(fact);
            }
        }
        let passes = matched.is_empty() != exists;
        self.memory.matches.insert(key, matched);
        let child = self.memory.single_children.get(&key).copied();
        match (passes, child) {
            (true, Some(child)) => self.emit(network, node, child, Delta::Modify),
            (true, None) => self.open_single(network, node, tuple, None),
            (false, Some(child)) => {
                self.memory.single_children.remove(&key);
                self.emit(network, node, child, Delta::Retract)
            }
            (false, None) => Ok(()),
        }
    }

    fn quantifier_right(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        fact: FactId,
        delta: Delta,
        exists: bool,
    ) -> Result<()> {
        let subject = self.memory.store.get(fact).cloned();
        for tuple in self.memory.beta_tuples(input.left) {
            let key = (node, tuple);
            let Some(before) = self.memory.matches.get(&key).cloned() else {
                continue;
            };
            let was = before.contains(&fact);
            if delta == Delta::Assert && was {
                continue;
            }
            let now = match (&subject, delta) {
                (Some(subject), Delta::Assert | Delta::Modify) => {
                    self.test_all(network, node, &input.conditions, Some(subject), Some(tuple))?
                }
                _ => false,
            };
            if was == now {
                continue;
            }
            let had_any = !before.is_empty();
            let mut after = before;
            if now {
                after.insert(fact);
            } else {
                after.remove(&fact);
            }
            let has_any = !after.is_empty();
            self.memory.matches.insert(key, after);
            if had_any == has_any {
                continue;
            }
            if has_any == exists {
                self.open_single(network, node, tuple, None)?;
            } else if let Some(child) = self.memory.single_children.remove(&key) {
                self.emit(network, node, child, Delta::Retract)?;
            }
        }
        Ok(())
    }

    /// Creates the only child of a left tuple.
    fn open_single(
        &mut self,
        network: &Network,
        node: NodeId,
        tuple: TupleId,
        fact: Option<FactId>,
    ) -> Result<()> {
        let child = self.memory.extend(tuple, fact);
        self.memory.single_children.insert((node, tuple), child);
        self.emit(network, node, child, Delta::Assert)
    }

    // =========================================================================
    // Binding
    // =========================================================================

    fn binding_left(
        &mut self,
        network: &Network,
        node: NodeId,
        expr: &CompiledExpr,
        tuple: TupleId,
        delta: Delta,
    ) -> Result<()> {
        let key = (node, tuple);
        let child = self.memory.single_children.get(&key).copied();
        if delta == Delta::Retract {
            if let Some(child) = child {
                self.close_binding(network, node, tuple, child)?;
            }
            return Ok(());
        }
        let value = self.eval_lhs(network, node, expr, None, Some(tuple))?;
        match (value, child) {
            (Some(value), Some(child)) => {
                if let Some(&fact) = self.memory.chain(child).last() {
                    self.memory
                        .store
                        .replace(network.registry(), fact, value, FactSource::Binding)?;
                }
                self.emit(network, node, child, Delta::Modify)
            }
            (Some(value), None) => {
                let fact = self.memory.store.insert_synthetic(
                    &FactType::from(BINDING_TYPE),
                    value,
                    FactSource::Binding,
                );
                self.open_single(network, node, tuple, Some(fact.id))
            }
            (None, Some(child)) => self.close_binding(network, node, tuple, child),
            (None, None) => Ok(()),
        }
    }

    fn close_binding(
        &mut self,
        network: &Network,
        node: NodeId,
        tuple: TupleId,
        child: TupleId,
    ) -> Result<()> {
        self.memory.single_children.remove(&(node, tuple));
        let fact = self.memory.chain(child).last().copied();
        self.emit(network, node, child, Delta::Retract)?;
        if let Some(fact) = fact {
            self.memory.store.remove(fact)?;
        }
        Ok(())
    }

    // =========================================================================
    // Aggregate
    // =========================================================================

    /// Pre-evaluates a source fact, or `None` if it does not feed the aggregate.
    fn aggregate_input(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        spec: &AggregateSpec,
        tuple: TupleId,
        fact: &Arc<Fact>,
    ) -> Result<Option<AggregateInput>> {
        if !self.test_all(network, node, &input.conditions, Some(fact), Some(tuple))? {
            return Ok(None);
        }
        let mut keys = Vec::with_capacity(spec.expressions.len());
        for expr in &spec.expressions {
            match self.eval_lhs(network, node, expr, Some(fact), Some(tuple))? {
                Some(value) => keys.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(AggregateInput {
            fact: fact.id,
            value: fact.value.clone(),
            keys,
        }))
    }

    fn aggregate_inputs(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        spec: &AggregateSpec,
        tuple: TupleId,
    ) -> Result<OrdMap<FactId, AggregateInput>> {
        let mut inputs = OrdMap::new();
        for id in self.memory.alpha_facts(input.right) {
            let Some(fact) = self.memory.store.get(id).cloned() else {
                continue;
            };
            if let Some(entry) = self.aggregate_input(network, node, input, spec, tuple, &fact)? {
                inputs.insert(id, entry);
            }
        }
        Ok(inputs)
    }

    fn aggregate_left(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        spec: &AggregateSpec,
        tuple: TupleId,
        delta: Delta,
    ) -> Result<()> {
        let key = (node, tuple);
        if delta == Delta::Retract {
            if let Some(state) = self.memory.aggregates.remove(&key) {
                for (_, entry) in state.results {
                    self.drop_result(network, node, entry)?;
                }
            }
            return Ok(());
        }

        let inputs = self.aggregate_inputs(network, node, input, spec, tuple)?;
        let Some(state) = self.memory.aggregates.get_mut(&key) else {
            let mut aggregator = network.aggregators.create(&spec.name, &spec.roles)?;
            let mut results = aggregator.initial();
            if !inputs.is_empty() {
                let batch: Vec<AggregateInput> = inputs.values().cloned().collect();
                results.extend(aggregator.add(&batch));
            }
            self.memory.aggregates.insert(
                key,
                AggregateState {
                    aggregator,
                    inputs,
                    results: OrdMap::new(),
                },
            );
            let touched = self.apply_results(network, node, tuple, spec, results)?;
            return self.reconcile(network, node, tuple, spec, touched);
        };

        let removed: Vec<AggregateInput> = state
            .inputs
            .iter()
            .filter(|(id, _)| !inputs.contains_key(*id))
            .map(|(_, i)| i.clone())
            .collect();
        let modified: Vec<AggregateInput> = inputs
            .iter()
            .filter(|(id, i)| state.inputs.get(*id).is_some_and(|old| old != *i))
            .map(|(_, i)| i.clone())
            .collect();
        let added: Vec<AggregateInput> = inputs
            .iter()
            .filter(|(id, _)| !state.inputs.contains_key(*id))
            .map(|(_, i)| i.clone())
            .collect();
        let mut results = Vec::new();
        if !removed.is_empty() {
            results.extend(state.aggregator.remove(&removed));
        }
        if !modified.is_empty() {
            results.extend(state.aggregator.modify(&modified));
        }
        if !added.is_empty() {
            results.extend(state.aggregator.add(&added));
        }
        state.inputs = inputs;
        self.apply_results(network, node, tuple, spec, results)?;
        // The outer tuple changed, so every surviving result is re-checked.
        let keys: Vec<Value> = self
            .memory
            .aggregates
            .get(&key)
            .map(|s| s.results.keys().cloned().collect())
            .unwrap_or_default();
        self.reconcile(network, node, tuple, spec, keys)
    }

    fn aggregate_right(
        &mut self,
        network: &Network,
        node: NodeId,
        input: &BetaInput,
        spec: &AggregateSpec,
        fact: FactId,
        delta: Delta,
    ) -> Result<()> {
        let subject = self.memory.store.get(fact).cloned();
        for tuple in self.memory.beta_tuples(input.left) {
            let key = (node, tuple);
            let Some(old) = self.memory.aggregates.get(&key).map(|s| s.inputs.get(&fact).cloned())
            else {
                continue;
            };
            if delta == Delta::Assert && old.is_some() {
                continue;
            }
            let new = match (&subject, delta) {
                (Some(subject), Delta::Assert | Delta::Modify) => {
                    self.aggregate_input(network, node, input, spec, tuple, subject)?
                }
                _ => None,
            };
            let Some(state) = self.memory.aggregates.get_mut(&key) else {
                continue;
            };
            let results = match (old, new) {
                (None, None) => continue,
                (Some(old), Some(new)) if old == new => continue,
                (Some(_), Some(new)) => {
                    state.inputs.insert(fact, new.clone());
                    state.aggregator.modify(&[new])
                }
                (Some(old), None) => {
                    state.inputs.remove(&fact);
                    state.aggregator.remove(&[old])
                }
                (None, Some(new)) => {
                    state.inputs.insert(fact, new.clone());
                    state.aggregator.add(&[new])
                }
            };
            let touched = self.apply_results(network, node, tuple, spec, results)?;
            self.reconcile(network, node, tuple, spec, touched)?;
        }
        Ok(())
    }

    /// Mirrors result changes into synthetic facts. Returns the keys that
    /// still need their child tuple brought up to date.
    fn apply_results(
        &mut self,
        network: &Network,
        node: NodeId,
        tuple: TupleId,
        spec: &AggregateSpec,
        results: Vec<AggregationResult>,
    ) -> Result<Vec<Value>> {
        let key = (node, tuple);
        let mut touched: Vec<Value> = Vec::new();
        for result in results {
            let AggregationResult {
                action,
                key: result_key,
                value,
                source,
                ..
            } = result;
            let entry = self
                .memory
                .aggregates
                .get(&key)
                .and_then(|s| s.results.get(&result_key))
                .cloned();
            let parents: Arc<[FactId]> = source.into();
            match (action, entry) {
                (AggregationAction::Added | AggregationAction::Modified, Some(entry)) => {
                    self.memory.store.replace(
                        network.registry(),
                        entry.fact,
                        value,
                        FactSource::Aggregate { parents },
                    )?;
                }
                (AggregationAction::Added | AggregationAction::Modified, None) => {
                    let fact = self.memory.store.insert_synthetic(
                        &spec.result_type,
                        value,
                        FactSource::Aggregate { parents },
                    );
                    if let Some(state) = self.memory.aggregates.get_mut(&key) {
                        state.results.insert(
                            result_key.clone(),
                            ResultEntry {
                                fact: fact.id,
                                child: None,
                            },
                        );
                    }
                }
                (AggregationAction::Removed, Some(entry)) => {
                    if let Some(state) = self.memory.aggregates.get_mut(&key) {
                        state.results.remove(&result_key);
                    }
                    self.drop_result(network, node, entry)?;
                    touched.retain(|k| k != &result_key);
                    continue;
                }
                (AggregationAction::Removed, None) => continue,
            }
            if !touched.contains(&result_key) {
                touched.push(result_key);
            }
        }
        Ok(touched)
    }

    fn drop_result(&mut self, network: &Network, node: NodeId, entry: ResultEntry) -> Result<()> {
        if let Some(child) = entry.child {
            self.emit(network, node, child, Delta::Retract)?;
        }
        self.memory.store.remove(entry.fact)?;
        Ok(())
    }

    fn set_result_child(&mut self, node: NodeId, tuple: TupleId, result: &Value, child: Option<TupleId>) {
        if let Some(entry) = self
            .memory
            .aggregates
            .get_mut(&(node, tuple))
            .and_then(|s| s.results.get_mut(result))
        {
            entry.child = child;
        }
    }

    /// Checks result conditions and asserts, modifies, or retracts result tuples.
    fn reconcile(
        &mut self,
        network: &Network,
        node: NodeId,
        tuple: TupleId,
        spec: &AggregateSpec,
        keys: Vec<Value>,
    ) -> Result<()> {
        for result in keys {
            let Some(entry) = self
                .memory
                .aggregates
                .get(&(node, tuple))
                .and_then(|s| s.results.get(&result))
                .cloned()
            else {
                continue;
            };
            let Some(fact) = self.memory.store.get(entry.fact).cloned() else {
                continue;
            };
            let passes =
                self.test_all(network, node, &spec.result_conditions, Some(&fact), Some(tuple))?;
            match (passes, entry.child) {
                (true, Some(child)) => self.emit(network, node, child, Delta::Modify)?,
                (true, None) => {
                    let child = self.memory.extend(tuple, Some(entry.fact));
                    self.set_result_child(node, tuple, &result, Some(child));
                    self.emit(network, node, child, Delta::Assert)?;
                }
                (false, Some(child)) => {
                    self.set_result_child(node, tuple, &result, None);
                    self.emit(network, node, child, Delta::Retract)?;
                }
                (false, None) => {}
            }
        }
        Ok(())
    }

    // =========================================================================
    // Terminal
    // =========================================================================

    fn terminal(&mut self, network: &Network, index: usize, tuple: TupleId, delta: Delta) -> Result<()> {
        let terminal = network.terminal(index);
        let key = ActivationKey {
            terminal: index,
            tuple,
        };
        match delta {
            Delta::Retract => self.deactivate(terminal, key),
            Delta::Assert | Delta::Modify => self.activate(terminal, key),
        }
    }

    /// Rule filters and session filters.
    fn accepts(&mut self, terminal: &Terminal, activation: &Activation) -> Result<bool> {
        for filter in &terminal.filters {
            if let CompiledFilter::Predicate(expr) = filter {
                let value = self.eval_agenda(terminal, expr, &activation.facts)?;
                if !value.is_some_and(|v| v.is_truthy()) {
                    return Ok(false);
                }
            }
        }
        Ok(self.filters.iter().all(|filter| filter(activation)))
    }

    /// Current values of the key-change filters, if the rule has any.
    fn change_keys(&mut self, terminal: &Terminal, facts: &[Arc<Fact>]) -> Result<Option<Vec<Value>>> {
        let mut keys = None;
        for filter in &terminal.filters {
            if let CompiledFilter::KeyChange(exprs) = filter {
                let values = keys.get_or_insert_with(Vec::new);
                for expr in exprs {
                    values.push(self.eval_agenda(terminal, expr, facts)?.unwrap_or(Value::Nil));
                }
            }
        }
        Ok(keys)
    }

    fn priority(&mut self, terminal: &Terminal, facts: &[Arc<Fact>]) -> Result<i64> {
        match &terminal.priority {
            CompiledPriority::Static(priority) => Ok(i64::from(*priority)),
            CompiledPriority::Dynamic(expr) => match self.eval_agenda(terminal, expr, facts)? {
                Some(Value::Int(priority)) => Ok(priority),
                Some(other) => {
                    let error = Error::type_mismatch(Type::Int, other.value_type());
                    self.agenda_failure(terminal, expr, facts, error)?;
                    Ok(0)
                }
                None => Ok(0),
            },
        }
    }

    /// Re-evaluates dynamic priorities of queued activations against their
    /// current facts, so the next pop reflects changes that did not requeue.
    ///
    /// An unhandled failure leaves the agenda as it was.
    pub(super) fn rescore_agenda(&mut self) -> Result<()> {
        let network = Arc::clone(&self.network);
        let dynamic: Vec<(ActivationKey, Vec<Arc<Fact>>)> = self
            .memory
            .agenda
            .pending()
            .filter(|a| {
                matches!(
                    network.terminal(a.key.terminal).priority,
                    CompiledPriority::Dynamic(_)
                )
            })
            .map(|a| (a.key, a.facts.clone()))
            .collect();
        if dynamic.is_empty() {
            return Ok(());
        }
        let before = self.memory.agenda.clone();
        for (key, facts) in dynamic {
            let terminal = network.terminal(key.terminal);
            match self.priority(terminal, &facts) {
                Ok(priority) => self.memory.agenda.reprioritize(&key, priority),
                Err(error) => {
                    self.memory.agenda = before;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn activate(&mut self, terminal: &Terminal, key: ActivationKey) -> Result<()> {
        let facts = self.tuple_facts(key.tuple);
        let existing = self.memory.agenda.get(&key).cloned();
        let mut activation = existing
            .clone()
            .unwrap_or_else(|| Activation::new(Arc::clone(&terminal.rule.name), key, Vec::new()));
        activation.facts = facts;

        if !self.accepts(terminal, &activation)? {
            if existing.is_some() {
                // Stays tracked so a later change can requeue it.
                self.memory.agenda.put(activation);
            }
            trace!(rule = %terminal.rule.name, key = %key, "activation filtered");
            return Ok(());
        }

        let change_keys = self.change_keys(terminal, &activation.facts)?;
        if let Some(previous) = &existing {
            if change_keys.is_some()
                && previous.change_keys == change_keys
                && (previous.is_queued() || previous.has_fired)
            {
                if let Some(record) = self.memory.agenda.get_mut(&key) {
                    record.facts = activation.facts;
                }
                return Ok(());
            }
        }
        activation.change_keys = change_keys;

        let event = match &existing {
            None => Some(false),
            Some(previous) if previous.has_fired => {
                if terminal.rule.repeatability == Repeatability::Repeatable {
                    activation.state = ActivationState::Updated;
                    Some(true)
                } else {
                    None
                }
            }
            Some(previous) => Some(previous.is_queued()),
        };
        let Some(updated) = event else {
            // A non-repeatable rule keeps its fired record current but never refires.
            self.memory.agenda.put(activation);
            return Ok(());
        };

        let priority = self.priority(terminal, &activation.facts)?;
        let facts = activation.facts.clone();
        self.memory.agenda.put(activation);
        self.memory.agenda.enqueue(key, priority);
        trace!(rule = %terminal.rule.name, key = %key, priority, updated, "activation queued");
        if self.observed() {
            let event = ActivationEvent {
                rule: Arc::clone(&terminal.rule.name),
                facts,
            };
            self.publish(if updated {
                EngineEvent::ActivationUpdated(event)
            } else {
                EngineEvent::ActivationCreated(event)
            });
        }
        Ok(())
    }

    fn deactivate(&mut self, terminal: &Terminal, key: ActivationKey) -> Result<()> {
        let Some(mut record) = self.memory.agenda.remove(&key) else {
            return Ok(());
        };
        self.memory.linked.source_removed(&key);
        trace!(rule = %terminal.rule.name, key = %key, "activation deleted");
        if self.observed() {
            self.publish(EngineEvent::ActivationDeleted(ActivationEvent {
                rule: Arc::clone(&record.rule),
                facts: record.facts.clone(),
            }));
        }
        if record.has_fired && terminal.has_trigger(ActionTrigger::DEACTIVATED) {
            let priority = record.priority;
            record.state = ActivationState::Deleted;
            self.memory.agenda.put(record);
            self.memory.agenda.enqueue(key, priority);
        }
        Ok(())
    }
}
