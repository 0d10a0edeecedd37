//! Incremental aggregation.
//!
//! An aggregate node keeps one [`Aggregator`] per left tuple and feeds it the
//! source facts that join with that tuple. Aggregators report deltas as
//! [`AggregationResult`]s; each result key maps to one synthetic fact and one
//! child tuple downstream.
//!
//! # Module Structure
//!
//! - `builtin` - Collect, GroupBy, ToLookup, Sort, Project, Flatten, Filter, First

mod builtin;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{Error, FactId, Result, Value};

pub use builtin::{Collect, Filter, First, Flatten, GroupBy, Project, Sort, ToLookup};

// =============================================================================
// Inputs and Results
// =============================================================================

/// A source fact with its aggregate expressions pre-evaluated.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateInput {
    /// The source fact.
    pub fact: FactId,
    /// Value of the source fact.
    pub value: Value,
    /// Aggregate expression results, in declaration order.
    pub keys: Vec<Value>,
}

impl AggregateInput {
    /// The expression result at `index`, or nil.
    #[must_use]
    pub fn key(&self, index: usize) -> &Value {
        static NIL: Value = Value::Nil;
        self.keys.get(index).unwrap_or(&NIL)
    }
}

/// Kind of change to an aggregation result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregationAction {
    /// A new result appeared.
    Added,
    /// An existing result changed.
    Modified,
    /// A result went away.
    Removed,
}

/// A change to one aggregation result.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregationResult {
    /// What happened.
    pub action: AggregationAction,
    /// Result key, stable for the result's lifetime.
    pub key: Value,
    /// Current value (last value for `Removed`).
    pub value: Value,
    /// Value before a modification.
    pub previous: Option<Value>,
    /// Facts contributing to the result.
    pub source: Vec<FactId>,
}

impl AggregationResult {
    /// A new result.
    #[must_use]
    pub fn added(key: Value, value: Value, source: Vec<FactId>) -> Self {
        Self {
            action: AggregationAction::Added,
            key,
            value,
            previous: None,
            source,
        }
    }

    /// A changed result.
    #[must_use]
    pub fn modified(key: Value, previous: Value, value: Value, source: Vec<FactId>) -> Self {
        Self {
            action: AggregationAction::Modified,
            key,
            value,
            previous: Some(previous),
            source,
        }
    }

    /// A removed result.
    #[must_use]
    pub fn removed(key: Value, value: Value) -> Self {
        Self {
            action: AggregationAction::Removed,
            key,
            value,
            previous: None,
            source: Vec::new(),
        }
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Incremental aggregation state for one left tuple.
///
/// Inputs passed to `modify` and `remove` were previously passed to `add`;
/// aggregators track facts by [`FactId`].
pub trait Aggregator: fmt::Debug + Send + Sync {
    /// Results to emit before any input arrives.
    fn initial(&mut self) -> Vec<AggregationResult>;

    /// Source facts started matching.
    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult>;

    /// Source facts changed and still match.
    fn modify(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult>;

    /// Source facts stopped matching.
    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult>;

    /// Clones the aggregator behind a box.
    fn clone_box(&self) -> Box<dyn Aggregator>;
}

impl Clone for Box<dyn Aggregator> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Creates an aggregator from the role names of its expressions.
pub type AggregatorFactory = Arc<dyn Fn(&[Arc<str>]) -> Result<Box<dyn Aggregator>> + Send + Sync>;

/// Name-keyed aggregator factories.
///
/// [`AggregatorRegistry::new`] registers the built-ins; user aggregators are
/// added with [`register`](Self::register) under their own name.
#[derive(Clone)]
pub struct AggregatorRegistry {
    factories: HashMap<Arc<str>, AggregatorFactory>,
}

impl Default for AggregatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorRegistry {
    /// Creates a registry with the built-in aggregators.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("Collect", |roles| {
            expect_roles("Collect", roles, &[])?;
            Ok(Box::new(Collect::default()))
        });
        registry.register("GroupBy", |roles| {
            expect_roles("GroupBy", roles, &["key"])?;
            Ok(Box::new(GroupBy::default()))
        });
        registry.register("ToLookup", |roles| {
            expect_roles("ToLookup", roles, &["key"])?;
            Ok(Box::new(ToLookup::default()))
        });
        registry.register("Sort", |roles| Ok(Box::new(Sort::from_roles(roles)?)));
        registry.register("Project", |roles| {
            expect_roles("Project", roles, &["selector"])?;
            Ok(Box::new(Project::default()))
        });
        registry.register("Flatten", |roles| {
            expect_roles("Flatten", roles, &["selector"])?;
            Ok(Box::new(Flatten::default()))
        });
        registry.register("Filter", |roles| {
            expect_roles("Filter", roles, &["predicate"])?;
            Ok(Box::new(Filter::default()))
        });
        registry.register("First", |roles| {
            expect_roles("First", roles, &[])?;
            Ok(Box::new(First::default()))
        });
        registry
    }

    /// Creates a registry with no aggregators.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers (or replaces) a factory.
    pub fn register(
        &mut self,
        name: impl Into<Arc<str>>,
        factory: impl Fn(&[Arc<str>]) -> Result<Box<dyn Aggregator>> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Returns true if an aggregator is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Creates an aggregator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown name or unsupported roles.
    pub fn create(&self, name: &str, roles: &[Arc<str>]) -> Result<Box<dyn Aggregator>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::invalid_argument(format!("unknown aggregator {name}")))?;
        factory(roles)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for AggregatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn expect_roles(name: &str, roles: &[Arc<str>], expected: &[&str]) -> Result<()> {
    if roles.len() == expected.len() && roles.iter().zip(expected).all(|(r, e)| &**r == *e) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "{name} expects expressions {expected:?}, got {roles:?}"
        )))
    }
}

// =============================================================================
// Result Coalescing
// =============================================================================

/// Collects the keys touched by a batch and their values before it.
///
/// Keyed aggregators call [`touch`](Self::touch) before changing a key, then
/// [`finish`](Self::finish) turns before/after pairs into one result per key.
#[derive(Default)]
pub(crate) struct Changes {
    touched: Vec<(Value, Option<Value>)>,
}

impl Changes {
    pub(crate) fn touch(&mut self, key: &Value, before: impl FnOnce() -> Option<Value>) {
        if !self.touched.iter().any(|(k, _)| k == key) {
            self.touched.push((key.clone(), before()));
        }
    }

    pub(crate) fn finish(
        self,
        mut after: impl FnMut(&Value) -> Option<(Value, Vec<FactId>)>,
    ) -> Vec<AggregationResult> {
        let mut results = Vec::new();
        for (key, before) in self.touched {
            match (before, after(&key)) {
                (None, Some((value, source))) => {
                    results.push(AggregationResult::added(key, value, source));
                }
                (Some(previous), Some((value, source))) => {
                    if previous != value {
                        results.push(AggregationResult::modified(key, previous, value, source));
                    }
                }
                (Some(previous), None) => results.push(AggregationResult::removed(key, previous)),
                (None, None) => {}
            }
        }
        results
    }
}
