//! Integration tests for incremental aggregation.
//!
//! Tests Collect, GroupBy, Sort, and user-registered aggregators running
//! inside sessions.

mod collect;
mod custom;
mod group_by;

use std::sync::{Arc, Mutex};

use kestrel_engine::{RuleRepository, Session};
use kestrel_foundation::Value;
use kestrel_language::RuleDefinition;
use kestrel_storage::FactSchema;

/// Values seen by a rule's action, one entry per firing.
pub type Seen = Arc<Mutex<Vec<Value>>>;

/// Compiles the rules and opens a session.
pub fn session_with(rules: Vec<RuleDefinition>, schemas: Vec<FactSchema>) -> Session {
    let mut repository = RuleRepository::new();
    for schema in schemas {
        repository.register_schema(schema).unwrap();
    }
    repository.add_rules(rules).unwrap();
    repository.compile().unwrap().create_session().unwrap()
}

/// Number of elements in a vector value.
pub fn len(value: &Value) -> usize {
    match value {
        Value::Vec(items) => items.len(),
        _ => 0,
    }
}
