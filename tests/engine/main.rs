//! Integration tests for Layer 3: Engine
//!
//! Tests convergence, identity errors, dynamic priority, quantifiers and repeatability.

mod convergence;
mod priority;
mod quantifiers;
mod repeatability;

use kestrel_engine::{RuleRepository, Session};
use kestrel_foundation::Value;
use kestrel_language::RuleDefinition;
use kestrel_storage::FactSchema;

/// Compiles the rules (and schemas) and opens a session.
pub fn session_with(rules: Vec<RuleDefinition>, schemas: Vec<FactSchema>) -> Session {
    let mut repository = RuleRepository::new();
    for schema in schemas {
        repository.register_schema(schema).unwrap();
    }
    repository.add_rules(rules).unwrap();
    repository.compile().unwrap().create_session().unwrap()
}

/// A named record.
pub fn named(name: &str) -> Value {
    Value::record([("name", Value::from(name))])
}
