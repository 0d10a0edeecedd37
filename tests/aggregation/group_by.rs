//! GroupBy regrouping under updates.

use std::sync::{Arc, Mutex};

use kestrel_foundation::Value;
use kestrel_language::{AggregateElement, Expr, PatternElement, RuleDefinition};
use kestrel_storage::FactSchema;

use super::{Seen, len, session_with};

fn order(id: i64, group: &str) -> Value {
    Value::record([("id", Value::from(id)), ("group", Value::from(group))])
}

fn groups_rule(seen: &Seen) -> RuleDefinition {
    let sink = Arc::clone(seen);
    RuleDefinition::new("OrderGroups")
        .when(PatternElement::new("g", "OrderGroup").from_aggregate(
            AggregateElement::group_by(PatternElement::new("o", "Order"), Expr::path("o", "group")),
        ))
        .then(move |ctx| {
            let group = ctx.get("g").cloned().unwrap_or(Value::Nil);
            sink.lock().unwrap().push(group);
            Ok(())
        })
}

fn summary(seen: &Seen) -> Vec<(String, usize)> {
    let mut groups: Vec<_> = seen
        .lock()
        .unwrap()
        .drain(..)
        .map(|g| {
            let key = g.get("key").and_then(Value::as_str).unwrap_or("").to_string();
            let size = g.get("items").map_or(0, len);
            (key, size)
        })
        .collect();
    groups.sort();
    groups
}

fn session(seen: &Seen) -> kestrel_engine::Session {
    session_with(
        vec![groups_rule(seen)],
        vec![FactSchema::new("Order").with_identity_field("id")],
    )
}

#[test]
fn one_result_per_group() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = session(&seen);
    session
        .insert_all([
            ("Order", order(1, "G1")),
            ("Order", order(2, "G1")),
            ("Order", order(3, "G2")),
        ])
        .unwrap();
    assert_eq!(session.fire().unwrap(), 2);
    assert_eq!(
        summary(&seen),
        vec![("G1".to_string(), 2), ("G2".to_string(), 1)]
    );
}

#[test]
fn moving_a_fact_touches_only_its_groups() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = session(&seen);
    session
        .insert_all([
            ("Order", order(1, "G1")),
            ("Order", order(2, "G1")),
            ("Order", order(3, "G2")),
            ("Order", order(4, "G3")),
        ])
        .unwrap();
    assert_eq!(session.fire().unwrap(), 3);
    summary(&seen);

    session.update("Order", order(1, "G2")).unwrap();
    assert_eq!(session.fire().unwrap(), 2);
    assert_eq!(
        summary(&seen),
        vec![("G1".to_string(), 1), ("G2".to_string(), 2)]
    );
}

#[test]
fn last_member_leaving_removes_the_group() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = session(&seen);
    session.insert("Order", order(1, "G1")).unwrap();
    assert_eq!(session.agenda_len(), 1);

    session.update("Order", order(1, "G2")).unwrap();
    assert_eq!(session.agenda_len(), 1);
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(summary(&seen), vec![("G2".to_string(), 1)]);

    session.retract("Order", order(1, "G2")).unwrap();
    assert_eq!(session.agenda_len(), 0);
}
