//! Built-in aggregators.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use kestrel_foundation::{Error, FactId, LtMap, Result, Value};

use super::{AggregateInput, AggregationResult, Aggregator, Changes};

/// Key of the single result produced by collection-style aggregators.
const SINGLE: Value = Value::Nil;

fn collection(items: &BTreeMap<FactId, Value>) -> Value {
    Value::from(items.values().cloned().collect::<Vec<_>>())
}

fn sources(items: &BTreeMap<FactId, Value>) -> Vec<FactId> {
    items.keys().copied().collect()
}

/// Applies a batch to a single collection-valued result and reports it as modified.
fn single_modified(
    items: &mut BTreeMap<FactId, Value>,
    apply: impl FnOnce(&mut BTreeMap<FactId, Value>),
) -> Vec<AggregationResult> {
    let previous = collection(items);
    apply(items);
    let value = collection(items);
    if previous == value {
        return Vec::new();
    }
    vec![AggregationResult::modified(SINGLE, previous, value, sources(items))]
}

// =============================================================================
// Collect
// =============================================================================

/// Collects matching facts into a vector, in fact order.
///
/// Emits an empty vector before any fact matches.
#[derive(Clone, Debug, Default)]
pub struct Collect {
    items: BTreeMap<FactId, Value>,
}

impl Aggregator for Collect {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(SINGLE, collection(&self.items), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        single_modified(&mut self.items, |items| {
            for input in inputs {
                items.insert(input.fact, input.value.clone());
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        single_modified(&mut self.items, |items| {
            for input in inputs {
                items.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

// =============================================================================
// GroupBy
// =============================================================================

/// Groups matching facts by the `key` expression.
///
/// Each group is a separate result `{key, items}` keyed by the group key.
/// Groups appear with their first member and disappear with their last.
#[derive(Clone, Debug, Default)]
pub struct GroupBy {
    groups: BTreeMap<Value, BTreeMap<FactId, Value>>,
    membership: BTreeMap<FactId, Value>,
}

impl GroupBy {
    fn group_value(key: &Value, items: &BTreeMap<FactId, Value>) -> Value {
        Value::record([("key", key.clone()), ("items", collection(items))])
    }

    fn current(&self, key: &Value) -> Option<Value> {
        self.groups.get(key).map(|items| Self::group_value(key, items))
    }

    fn detach(&mut self, fact: FactId, changes: &mut Changes) {
        if let Some(old) = self.membership.remove(&fact) {
            changes.touch(&old, || self.current(&old));
            if let Some(items) = self.groups.get_mut(&old) {
                items.remove(&fact);
                if items.is_empty() {
                    self.groups.remove(&old);
                }
            }
        }
    }

    fn attach(&mut self, input: &AggregateInput, changes: &mut Changes) {
        let key = input.key(0).clone();
        changes.touch(&key, || self.current(&key));
        self.groups
            .entry(key.clone())
            .or_default()
            .insert(input.fact, input.value.clone());
        self.membership.insert(input.fact, key);
    }

    fn finish(&self, changes: Changes) -> Vec<AggregationResult> {
        changes.finish(|key| {
            self.groups
                .get(key)
                .map(|items| (Self::group_value(key, items), sources(items)))
        })
    }
}

impl Aggregator for GroupBy {
    fn initial(&mut self) -> Vec<AggregationResult> {
        Vec::new()
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        let mut changes = Changes::default();
        for input in inputs {
            self.attach(input, &mut changes);
        }
        self.finish(changes)
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        let mut changes = Changes::default();
        for input in inputs {
            self.detach(input.fact, &mut changes);
            self.attach(input, &mut changes);
        }
        self.finish(changes)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        let mut changes = Changes::default();
        for input in inputs {
            self.detach(input.fact, &mut changes);
        }
        self.finish(changes)
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

// =============================================================================
// ToLookup
// =============================================================================

/// Builds one map from `key` to the vector of matching facts with that key.
#[derive(Clone, Debug, Default)]
pub struct ToLookup {
    items: BTreeMap<FactId, (Value, Value)>,
}

impl ToLookup {
    fn lookup(&self) -> Value {
        let mut groups: BTreeMap<Value, Vec<Value>> = BTreeMap::new();
        for (key, value) in self.items.values() {
            groups.entry(key.clone()).or_default().push(value.clone());
        }
        Value::Map(
            groups
                .into_iter()
                .map(|(k, vs)| (k, Value::from(vs)))
                .collect::<LtMap<Value, Value>>(),
        )
    }

    fn change(&mut self, apply: impl FnOnce(&mut BTreeMap<FactId, (Value, Value)>)) -> Vec<AggregationResult> {
        let previous = self.lookup();
        apply(&mut self.items);
        let value = self.lookup();
        if previous == value {
            return Vec::new();
        }
        let source = self.items.keys().copied().collect();
        vec![AggregationResult::modified(SINGLE, previous, value, source)]
    }
}

impl Aggregator for ToLookup {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(SINGLE, self.lookup(), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|items| {
            for input in inputs {
                items.insert(input.fact, (input.key(0).clone(), input.value.clone()));
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|items| {
            for input in inputs {
                items.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

// =============================================================================
// Sort
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
struct SortKey {
    keys: Vec<Value>,
    descending: Arc<[bool]>,
    fact: FactId,
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for ((a, b), desc) in self.keys.iter().zip(&other.keys).zip(self.descending.iter()) {
            let ord = if *desc { b.cmp(a) } else { a.cmp(b) };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.fact.cmp(&other.fact)
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders matching facts by a chain of ascending/descending keys.
///
/// Ties keep fact order. The sorted index is maintained incrementally.
#[derive(Clone, Debug)]
pub struct Sort {
    descending: Arc<[bool]>,
    sorted: BTreeMap<SortKey, Value>,
    positions: BTreeMap<FactId, SortKey>,
}

impl Sort {
    /// Creates a sort from `asc`/`desc` role names.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for no keys or an unknown role.
    pub fn from_roles(roles: &[Arc<str>]) -> Result<Self> {
        if roles.is_empty() {
            return Err(Error::invalid_argument("Sort needs at least one key"));
        }
        let descending = roles
            .iter()
            .map(|role| match &**role {
                "asc" => Ok(false),
                "desc" => Ok(true),
                other => Err(Error::invalid_argument(format!(
                    "Sort key must be asc or desc, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            descending: descending.into(),
            sorted: BTreeMap::new(),
            positions: BTreeMap::new(),
        })
    }

    fn output(&self) -> Value {
        Value::from(self.sorted.values().cloned().collect::<Vec<_>>())
    }

    fn unlink(&mut self, fact: FactId) {
        if let Some(key) = self.positions.remove(&fact) {
            self.sorted.remove(&key);
        }
    }

    fn link(&mut self, input: &AggregateInput) {
        let key = SortKey {
            keys: input.keys.clone(),
            descending: Arc::clone(&self.descending),
            fact: input.fact,
        };
        self.sorted.insert(key.clone(), input.value.clone());
        self.positions.insert(input.fact, key);
    }

    fn change(&mut self, apply: impl FnOnce(&mut Self)) -> Vec<AggregationResult> {
        let previous = self.output();
        apply(self);
        let value = self.output();
        if previous == value {
            return Vec::new();
        }
        let source = self.sorted.keys().map(|k| k.fact).collect();
        vec![AggregationResult::modified(SINGLE, previous, value, source)]
    }
}

impl Aggregator for Sort {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(SINGLE, self.output(), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|sort| {
            for input in inputs {
                sort.unlink(input.fact);
                sort.link(input);
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|sort| {
            for input in inputs {
                sort.unlink(input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

// =============================================================================
// Project / Flatten / Filter
// =============================================================================

/// Maps every matching fact through `selector`.
#[derive(Clone, Debug, Default)]
pub struct Project {
    items: BTreeMap<FactId, Value>,
}

impl Aggregator for Project {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(SINGLE, collection(&self.items), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        single_modified(&mut self.items, |items| {
            for input in inputs {
                items.insert(input.fact, input.key(0).clone());
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        single_modified(&mut self.items, |items| {
            for input in inputs {
                items.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

/// Concatenates the collections `selector` produces for every matching fact.
///
/// Nil contributes nothing and scalars contribute themselves.
#[derive(Clone, Debug, Default)]
pub struct Flatten {
    items: BTreeMap<FactId, Vec<Value>>,
}

impl Flatten {
    fn output(&self) -> Value {
        Value::from(self.items.values().flatten().cloned().collect::<Vec<_>>())
    }

    fn elements(value: &Value) -> Vec<Value> {
        match value {
            Value::Nil => Vec::new(),
            Value::Vec(v) => v.iter().cloned().collect(),
            Value::Set(s) => s.iter().cloned().collect(),
            other => vec![other.clone()],
        }
    }

    fn change(&mut self, apply: impl FnOnce(&mut BTreeMap<FactId, Vec<Value>>)) -> Vec<AggregationResult> {
        let previous = self.output();
        apply(&mut self.items);
        let value = self.output();
        if previous == value {
            return Vec::new();
        }
        let source = self.items.keys().copied().collect();
        vec![AggregationResult::modified(SINGLE, previous, value, source)]
    }
}

impl Aggregator for Flatten {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(SINGLE, self.output(), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|items| {
            for input in inputs {
                items.insert(input.fact, Self::elements(input.key(0)));
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|items| {
            for input in inputs {
                items.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

/// Collects the matching facts whose `predicate` is truthy.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    items: BTreeMap<FactId, Value>,
}

impl Aggregator for Filter {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(SINGLE, collection(&self.items), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        single_modified(&mut self.items, |items| {
            for input in inputs {
                if input.key(0).is_truthy() {
                    items.insert(input.fact, input.value.clone());
                } else {
                    items.remove(&input.fact);
                }
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        single_modified(&mut self.items, |items| {
            for input in inputs {
                items.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

// =============================================================================
// First
// =============================================================================

/// The earliest matching fact. No result while nothing matches.
#[derive(Clone, Debug, Default)]
pub struct First {
    items: BTreeMap<FactId, Value>,
}

impl First {
    fn current(&self) -> Option<Value> {
        self.items.values().next().cloned()
    }

    fn change(&mut self, apply: impl FnOnce(&mut BTreeMap<FactId, Value>)) -> Vec<AggregationResult> {
        let mut changes = Changes::default();
        changes.touch(&SINGLE, || self.current());
        apply(&mut self.items);
        changes.finish(|_| {
            self.items
                .iter()
                .next()
                .map(|(id, value)| (value.clone(), vec![*id]))
        })
    }
}

impl Aggregator for First {
    fn initial(&mut self) -> Vec<AggregationResult> {
        Vec::new()
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|items| {
            for input in inputs {
                items.insert(input.fact, input.value.clone());
            }
        })
    }

    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.add(inputs)
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|items| {
            for input in inputs {
                items.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}
