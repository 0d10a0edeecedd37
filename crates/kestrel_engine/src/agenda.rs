//! Activation bookkeeping and conflict resolution.
//!
//! The agenda keeps one record per (terminal, tuple) match and a priority
//! queue over the records that are waiting to fire. Queue order is priority
//! descending, then FIFO by the sequence number assigned each time a record
//! is (re)queued. Both structures are persistent so the agenda is part of a
//! session snapshot.

use std::cmp::Reverse;
use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{TupleId, Value};
use kestrel_language::ActionTrigger;
use kestrel_storage::Fact;

// =============================================================================
// Activation
// =============================================================================

/// Identity of a match: the terminal that produced it and its tuple.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActivationKey {
    /// Index of the rule branch terminal.
    pub terminal: usize,
    /// Tuple of the match.
    pub tuple: TupleId,
}

impl fmt::Display for ActivationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}/{}", self.terminal, self.tuple)
    }
}

/// Where an activation is in its lifecycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActivationState {
    /// New match, not fired yet.
    Created,
    /// Fired match whose facts changed.
    Updated,
    /// Fired match that went away.
    Deleted,
}

impl ActivationState {
    /// Action trigger a firing in this state runs.
    #[must_use]
    pub const fn trigger(self) -> ActionTrigger {
        match self {
            Self::Created => ActionTrigger::ACTIVATED,
            Self::Updated => ActionTrigger::REACTIVATED,
            Self::Deleted => ActionTrigger::DEACTIVATED,
        }
    }
}

/// A rule match tracked by the agenda.
#[derive(Clone, Debug)]
pub struct Activation {
    /// Rule name.
    pub rule: Arc<str>,
    /// Match identity.
    pub key: ActivationKey,
    /// Last known facts, in tuple order.
    pub facts: Vec<Arc<Fact>>,
    /// Lifecycle state.
    pub state: ActivationState,
    /// Priority the activation was last queued or re-scored with.
    pub priority: i64,
    /// Queue sequence, present while queued.
    pub sequence: Option<u64>,
    /// Whether the match has fired at least once.
    pub has_fired: bool,
    /// Key-change values recorded at the last accepted activation.
    pub(crate) change_keys: Option<Vec<Value>>,
}

impl Activation {
    pub(crate) fn new(rule: Arc<str>, key: ActivationKey, facts: Vec<Arc<Fact>>) -> Self {
        Self {
            rule,
            key,
            facts,
            state: ActivationState::Created,
            priority: 0,
            sequence: None,
            has_fired: false,
            change_keys: None,
        }
    }

    /// Returns true while waiting to fire.
    #[must_use]
    pub fn is_queued(&self) -> bool {
        self.sequence.is_some()
    }
}

// =============================================================================
// Agenda
// =============================================================================

type QueueEntry = (Reverse<i64>, u64, ActivationKey);

/// Activation records and the firing queue.
#[derive(Clone, Debug, Default)]
pub struct Agenda {
    records: im::OrdMap<ActivationKey, Activation>,
    queue: im::OrdSet<QueueEntry>,
    next_sequence: u64,
}

impl Agenda {
    /// Creates an empty agenda.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The record for a match.
    #[must_use]
    pub fn get(&self, key: &ActivationKey) -> Option<&Activation> {
        self.records.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &ActivationKey) -> Option<&mut Activation> {
        self.records.get_mut(key)
    }

    /// Stores a record without queueing it.
    pub(crate) fn put(&mut self, activation: Activation) {
        if let Some(old) = self.records.get(&activation.key) {
            if let Some(sequence) = old.sequence {
                self.queue.remove(&(Reverse(old.priority), sequence, old.key));
            }
        }
        let mut activation = activation;
        activation.sequence = None;
        self.records.insert(activation.key, activation);
    }

    /// Queues (or re-queues) a stored record with a fresh sequence.
    pub(crate) fn enqueue(&mut self, key: ActivationKey, priority: i64) {
        self.dequeue(&key);
        let sequence = self.next_sequence;
        if let Some(record) = self.records.get_mut(&key) {
            self.next_sequence += 1;
            record.priority = priority;
            record.sequence = Some(sequence);
            self.queue.insert((Reverse(priority), sequence, key));
        }
    }

    /// Changes the priority of a queued record, keeping its sequence.
    pub(crate) fn reprioritize(&mut self, key: &ActivationKey, priority: i64) {
        let Some(record) = self.records.get_mut(key) else {
            return;
        };
        let Some(sequence) = record.sequence else {
            return;
        };
        if record.priority != priority {
            self.queue.remove(&(Reverse(record.priority), sequence, *key));
            record.priority = priority;
            self.queue.insert((Reverse(priority), sequence, *key));
        }
    }

    /// Takes a record off the queue, keeping it.
    pub(crate) fn dequeue(&mut self, key: &ActivationKey) {
        if let Some(record) = self.records.get_mut(key) {
            if let Some(sequence) = record.sequence.take() {
                self.queue.remove(&(Reverse(record.priority), sequence, *key));
            }
        }
    }

    /// Drops a record and its queue entry.
    pub(crate) fn remove(&mut self, key: &ActivationKey) -> Option<Activation> {
        self.dequeue(key);
        self.records.remove(key)
    }

    /// Key of the activation that fires next.
    #[must_use]
    pub fn peek(&self) -> Option<ActivationKey> {
        self.queue.get_min().map(|(_, _, key)| *key)
    }

    /// Records a firing: the activation leaves the queue, and a deactivation
    /// record is discarded since its match is already gone.
    pub(crate) fn consume(&mut self, key: &ActivationKey) {
        if let Some(record) = self.records.get_mut(key) {
            record.has_fired = true;
        }
        self.skip(key);
    }

    /// Takes an activation off the queue without counting it as fired, as
    /// when its action failed and a handler recovered the failure. A match
    /// that never fired successfully stays eligible when it changes again.
    pub(crate) fn skip(&mut self, key: &ActivationKey) {
        self.dequeue(key);
        if self
            .records
            .get(key)
            .is_some_and(|r| r.state == ActivationState::Deleted)
        {
            self.records.remove(key);
        }
    }

    /// Number of queued activations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of tracked matches, fired ones included.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Queued activations in firing order.
    pub fn pending(&self) -> impl Iterator<Item = &Activation> + '_ {
        self.queue
            .iter()
            .filter_map(|(_, _, key)| self.records.get(key))
    }

    /// Every tracked match.
    pub fn records(&self) -> impl Iterator<Item = &Activation> + '_ {
        self.records.values()
    }
}
