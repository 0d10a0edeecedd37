//! Per-session network state.
//!
//! Everything here is built from persistent collections, so cloning a
//! `WorkingMemory` is O(1) and serves as the rollback snapshot for a unit of
//! work.

use im::{HashMap, OrdMap, OrdSet};
use kestrel_foundation::{FactId, LtVec, TupleId, Value};
use kestrel_storage::FactStore;

use crate::agenda::Agenda;
use crate::aggregate::{AggregateInput, Aggregator};
use crate::linked::LinkedFacts;
use crate::network::NodeId;

/// Synthetic fact and child tuple behind one aggregation result key.
#[derive(Clone, Debug)]
pub(crate) struct ResultEntry {
    pub fact: FactId,
    pub child: Option<TupleId>,
}

/// Aggregation state of one (aggregate node, left tuple) pair.
#[derive(Clone, Debug)]
pub(crate) struct AggregateState {
    pub aggregator: Box<dyn Aggregator>,
    pub inputs: OrdMap<FactId, AggregateInput>,
    pub results: OrdMap<Value, ResultEntry>,
}

#[derive(Clone, Debug)]
pub(crate) struct WorkingMemory {
    pub store: FactStore,
    /// Facts held by each alpha memory.
    pub alpha: HashMap<NodeId, OrdSet<FactId>>,
    /// Tuples held by each beta memory (and the root).
    pub beta: HashMap<NodeId, OrdSet<TupleId>>,
    /// Fact chain of every live tuple.
    pub tuples: OrdMap<TupleId, LtVec<FactId>>,
    next_tuple: u64,
    /// Join children by (join, left tuple, right fact).
    pub join_children: OrdMap<(NodeId, TupleId, FactId), TupleId>,
    /// Join children by (join, right fact, left tuple).
    pub join_by_right: OrdMap<(NodeId, FactId, TupleId), TupleId>,
    /// Only child of a left tuple at Not, Exists, and Binding nodes.
    pub single_children: OrdMap<(NodeId, TupleId), TupleId>,
    /// Matching right facts of a left tuple at Not and Exists nodes.
    pub matches: OrdMap<(NodeId, TupleId), OrdSet<FactId>>,
    pub aggregates: OrdMap<(NodeId, TupleId), AggregateState>,
    pub agenda: Agenda,
    pub linked: LinkedFacts,
}

impl WorkingMemory {
    /// Memory holding only the root tuple.
    pub(crate) fn new(root: NodeId) -> Self {
        let mut memory = Self {
            store: FactStore::new(),
            alpha: HashMap::new(),
            beta: HashMap::new(),
            tuples: OrdMap::new(),
            next_tuple: 0,
            join_children: OrdMap::new(),
            join_by_right: OrdMap::new(),
            single_children: OrdMap::new(),
            matches: OrdMap::new(),
            aggregates: OrdMap::new(),
            agenda: Agenda::new(),
            linked: LinkedFacts::default(),
        };
        memory.tuples.insert(TupleId::ROOT, LtVec::new());
        memory
            .beta
            .entry(root)
            .or_insert_with(OrdSet::new)
            .insert(TupleId::ROOT);
        memory
    }

    /// Allocates a tuple extending `parent` (optionally by one fact).
    pub(crate) fn extend(&mut self, parent: TupleId, fact: Option<FactId>) -> TupleId {
        self.next_tuple += 1;
        let id = TupleId(self.next_tuple);
        let chain = self.tuples.get(&parent).cloned().unwrap_or_default();
        let chain = match fact {
            Some(fact) => chain.push_back(fact),
            None => chain,
        };
        self.tuples.insert(id, chain);
        id
    }

    pub(crate) fn chain(&self, tuple: TupleId) -> Vec<FactId> {
        self.tuples
            .get(&tuple)
            .map(|chain| chain.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn alpha_facts(&self, node: NodeId) -> Vec<FactId> {
        self.alpha
            .get(&node)
            .map(|facts| facts.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn alpha_contains(&self, node: NodeId, fact: FactId) -> bool {
        self.alpha.get(&node).is_some_and(|facts| facts.contains(&fact))
    }

    pub(crate) fn beta_tuples(&self, node: NodeId) -> Vec<TupleId> {
        self.beta
            .get(&node)
            .map(|tuples| tuples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes and returns the join children of a left tuple.
    pub(crate) fn take_join_children_of_left(
        &mut self,
        node: NodeId,
        left: TupleId,
    ) -> Vec<TupleId> {
        let lower = (node, left, FactId(0));
        let upper = (node, left, FactId(u64::MAX));
        let entries: Vec<_> = self
            .join_children
            .range(lower..=upper)
            .map(|(key, child)| (*key, *child))
            .collect();
        entries
            .into_iter()
            .map(|((node, left, fact), child)| {
                self.join_children.remove(&(node, left, fact));
                self.join_by_right.remove(&(node, fact, left));
                child
            })
            .collect()
    }

    /// Removes and returns the join children of a right fact.
    pub(crate) fn take_join_children_of_right(
        &mut self,
        node: NodeId,
        fact: FactId,
    ) -> Vec<TupleId> {
        let lower = (node, fact, TupleId(0));
        let upper = (node, fact, TupleId(u64::MAX));
        let entries: Vec<_> = self
            .join_by_right
            .range(lower..=upper)
            .map(|(key, child)| (*key, *child))
            .collect();
        entries
            .into_iter()
            .map(|((node, fact, left), child)| {
                self.join_by_right.remove(&(node, fact, left));
                self.join_children.remove(&(node, left, fact));
                child
            })
            .collect()
    }

    pub(crate) fn link_join_child(
        &mut self,
        node: NodeId,
        left: TupleId,
        fact: FactId,
        child: TupleId,
    ) {
        self.join_children.insert((node, left, fact), child);
        self.join_by_right.insert((node, fact, left), child);
    }

    pub(crate) fn unlink_join_child(&mut self, node: NodeId, left: TupleId, fact: FactId) {
        self.join_children.remove(&(node, left, fact));
        self.join_by_right.remove(&(node, fact, left));
    }
}
