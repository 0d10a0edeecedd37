//! Integration tests for rule-owned (linked) facts.

mod queued;
mod sources;

use kestrel_engine::{RuleRepository, Session};
use kestrel_foundation::Value;
use kestrel_language::RuleDefinition;
use kestrel_storage::FactSchema;

/// Compiles the rules with a `Person` schema keyed by name.
pub fn session_with(rules: Vec<RuleDefinition>) -> Session {
    let mut repository = RuleRepository::new();
    repository
        .register_schema(FactSchema::new("Person").with_identity_field("name"))
        .unwrap();
    repository.add_rules(rules).unwrap();
    repository.compile().unwrap().create_session().unwrap()
}

/// A person living in a city.
pub fn person(name: &str, city: &str) -> Value {
    Value::record([("name", Value::from(name)), ("city", Value::from(city))])
}
