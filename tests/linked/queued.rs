//! Queued linked changes applied in batches.

use std::sync::{Arc, Mutex};

use kestrel_engine::{LinkedAction, LinkedBatch, RuleRepository, Session};
use kestrel_foundation::Value;
use kestrel_language::{PatternElement, RuleDefinition};
use kestrel_storage::FactSchema;

use super::{person, session_with};

fn queued_badges() -> RuleDefinition {
    RuleDefinition::new("Badge")
        .when(PatternElement::new("p", "Person"))
        .then(|ctx| {
            let name = ctx.get("p").and_then(|p| p.get("name")).cloned().unwrap_or(Value::Nil);
            let badge = Value::record([("holder", name.clone())]);
            ctx.queue_insert_linked(name, "Badge".into(), badge);
            Ok(())
        })
}

#[test]
fn queued_changes_wait_for_propagation() {
    let mut session = session_with(vec![queued_badges()]);
    session
        .insert_all([
            ("Person", person("Ada", "Paris")),
            ("Person", person("Bob", "Rome")),
            ("Person", person("Cy", "Oslo")),
        ])
        .unwrap();
    assert_eq!(session.fire().unwrap(), 3);
    assert_eq!(session.queued_linked(), 3);
    assert!(session.query("Badge").is_empty());

    let batches = session.propagate_chained().unwrap();
    assert_eq!(
        batches,
        vec![LinkedBatch {
            action: LinkedAction::Insert,
            fact_count: 3,
        }]
    );
    assert_eq!(session.queued_linked(), 0);
    assert_eq!(session.query("Badge").len(), 3);
}

#[test]
fn empty_queue_propagates_nothing() {
    let mut session = session_with(vec![queued_badges()]);
    assert!(session.propagate_linked().unwrap().is_empty());
}

#[test]
fn queued_fact_of_a_departed_source_is_orphaned() {
    let mut session = session_with(vec![queued_badges()]);
    session.insert("Person", person("Ada", "Paris")).unwrap();
    session.fire().unwrap();
    session.retract("Person", person("Ada", "Paris")).unwrap();

    session.propagate_linked().unwrap();
    assert!(session.query("Badge").is_empty());
}

/// Applies `Command { op, key, value }` facts as queued changes to `Entry` facts.
fn ledger() -> RuleDefinition {
    RuleDefinition::new("Ledger")
        .when(PatternElement::new("c", "Command"))
        .then(|ctx| {
            let field = |name: &str| {
                ctx.get("c")
                    .and_then(|c| c.get(name))
                    .cloned()
                    .unwrap_or(Value::Nil)
            };
            let (op, key, value) = (field("op"), field("key"), field("value"));
            let entry = Value::record([("key", key.clone()), ("value", value)]);
            match op.as_str() {
                Some("insert") => ctx.queue_insert_linked(key, "Entry".into(), entry),
                Some("update") => ctx.queue_update_linked(key, entry),
                Some("retract") => ctx.queue_retract_linked(key),
                _ => {}
            }
            Ok(())
        })
}

fn command(op: &str, key: &str, value: i64) -> Value {
    Value::record([
        ("op", Value::from(op)),
        ("key", Value::from(key)),
        ("value", Value::from(value)),
    ])
}

fn ledger_session() -> Session {
    let mut repository = RuleRepository::new();
    repository
        .register_schema(FactSchema::new("Entry").with_identity_field("key"))
        .unwrap();
    repository.add_rule(ledger()).unwrap();
    repository.compile().unwrap().create_session().unwrap()
}

fn entries(session: &Session) -> Vec<(String, i64)> {
    let mut entries: Vec<_> = session
        .query("Entry")
        .iter()
        .filter_map(|f| match (f.get("key"), f.get("value")) {
            (Some(Value::String(k)), Some(Value::Int(v))) => Some((k.to_string(), *v)),
            _ => None,
        })
        .collect();
    entries.sort();
    entries
}

#[test]
fn mixed_queue_runs_one_pass_per_group() {
    let mut session = ledger_session();
    for key in ["a", "b", "c"] {
        session.insert("Command", command("insert", key, 1)).unwrap();
    }
    session.fire().unwrap();
    session.propagate_linked().unwrap();

    for (op, key) in [("insert", "d"), ("update", "a"), ("update", "b"), ("retract", "c")] {
        session.insert("Command", command(op, key, 2)).unwrap();
    }
    assert_eq!(session.fire().unwrap(), 4);
    assert_eq!(session.queued_linked(), 4);
    // Without a live source, `d` is orphaned as soon as its group ends.
    session.retract("Command", command("insert", "d", 2)).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    session.subscribe(move |event| {
        let name = event.name();
        if matches!(name, "FactInserted" | "FactUpdated" | "FactRetracted") {
            sink.lock().unwrap().push(name);
        }
    });

    let batches = session.propagate_linked().unwrap();
    assert_eq!(
        batches,
        vec![
            LinkedBatch {
                action: LinkedAction::Insert,
                fact_count: 1,
            },
            LinkedBatch {
                action: LinkedAction::Update,
                fact_count: 2,
            },
            LinkedBatch {
                action: LinkedAction::Retract,
                fact_count: 1,
            },
        ]
    );
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "FactInserted",
            "FactRetracted",
            "FactUpdated",
            "FactUpdated",
            "FactRetracted",
        ]
    );
    assert_eq!(entries(&session), vec![("a".to_string(), 2), ("b".to_string(), 2)]);
    assert_eq!(session.queued_linked(), 0);
}
