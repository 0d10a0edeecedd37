//! Bookkeeping for facts owned by rules.
//!
//! A linked fact is addressed by `(rule, key)`. Every activation that upserts
//! it is recorded as a source; once the last source activation leaves the
//! agenda the entry becomes an orphan and the session retracts it at the end
//! of the current propagation pass.

use std::fmt;
use std::sync::Arc;

use im::{OrdMap, OrdSet, Vector};
use kestrel_foundation::{FactId, Value};
use kestrel_storage::FactType;

use crate::agenda::ActivationKey;

/// Address of a linked fact.
pub(crate) type LinkedKey = (Arc<str>, Value);

/// Kind of queued linked-fact change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LinkedAction {
    /// Insert, or update when the key is present.
    Insert,
    /// Update of an existing linked fact.
    Update,
    /// Retraction of an existing linked fact.
    Retract,
}

impl fmt::Display for LinkedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A run of queued changes applied in one propagation pass.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkedBatch {
    /// Action shared by the run.
    pub action: LinkedAction,
    /// Number of queued entries in the run.
    pub fact_count: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct LinkedEntry {
    pub fact: FactId,
    pub fact_type: FactType,
    pub sources: OrdSet<ActivationKey>,
}

/// A change recorded by a `queue_*` call.
#[derive(Clone, Debug)]
pub(crate) enum QueuedLinked {
    Upsert {
        key: LinkedKey,
        source: Option<ActivationKey>,
        parents: Arc<[FactId]>,
        fact_type: FactType,
        value: Value,
    },
    Update {
        key: LinkedKey,
        parents: Arc<[FactId]>,
        value: Value,
    },
    Retract {
        key: LinkedKey,
    },
}

impl QueuedLinked {
    pub(crate) fn action(&self) -> LinkedAction {
        match self {
            Self::Upsert { .. } => LinkedAction::Insert,
            Self::Update { .. } => LinkedAction::Update,
            Self::Retract { .. } => LinkedAction::Retract,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct LinkedFacts {
    entries: OrdMap<LinkedKey, LinkedEntry>,
    by_source: OrdMap<ActivationKey, OrdSet<LinkedKey>>,
    orphans: OrdSet<LinkedKey>,
    queue: Vector<QueuedLinked>,
}

impl LinkedFacts {
    pub(crate) fn get(&self, key: &LinkedKey) -> Option<&LinkedEntry> {
        self.entries.get(key)
    }

    /// Records a new entry. Without a source it is orphaned immediately.
    pub(crate) fn insert(
        &mut self,
        key: LinkedKey,
        fact: FactId,
        fact_type: FactType,
        source: Option<ActivationKey>,
    ) {
        self.entries.insert(
            key.clone(),
            LinkedEntry {
                fact,
                fact_type,
                sources: OrdSet::new(),
            },
        );
        match source {
            Some(source) => self.add_source(&key, source),
            None => {
                self.orphans.insert(key);
            }
        }
    }

    pub(crate) fn add_source(&mut self, key: &LinkedKey, source: ActivationKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.sources.insert(source);
            self.orphans.remove(key);
            self.by_source
                .entry(source)
                .or_insert_with(OrdSet::new)
                .insert(key.clone());
        }
    }

    /// An activation left the agenda; entries it was the last source of become orphans.
    pub(crate) fn source_removed(&mut self, source: &ActivationKey) {
        let Some(keys) = self.by_source.remove(source) else {
            return;
        };
        for key in keys {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.sources.remove(source);
                if entry.sources.is_empty() {
                    self.orphans.insert(key);
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &LinkedKey) -> Option<LinkedEntry> {
        let entry = self.entries.remove(key)?;
        for source in &entry.sources {
            if let Some(keys) = self.by_source.get_mut(source) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_source.remove(source);
                }
            }
        }
        self.orphans.remove(key);
        Some(entry)
    }

    /// Orphaned entries that still have no source.
    pub(crate) fn take_orphans(&mut self) -> Vec<LinkedKey> {
        let orphans = std::mem::take(&mut self.orphans);
        orphans
            .into_iter()
            .filter(|key| {
                self.entries
                    .get(key)
                    .is_some_and(|entry| entry.sources.is_empty())
            })
            .collect()
    }

    pub(crate) fn enqueue(&mut self, change: QueuedLinked) {
        self.queue.push_back(change);
    }

    pub(crate) fn take_queue(&mut self) -> Vector<QueuedLinked> {
        std::mem::take(&mut self.queue)
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
