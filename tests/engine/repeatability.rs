//! Repeatable and non-repeatable rules that mutate their own match.

use std::sync::{Arc, Mutex};

use kestrel_engine::EngineEvent;
use kestrel_foundation::{Error, Value};
use kestrel_language::{Expr, FilterElement, PatternElement, Repeatability, RuleDefinition};
use kestrel_storage::FactSchema;

use super::session_with;

fn counter(count: i64) -> Value {
    Value::record([("id", Value::from("c")), ("count", Value::from(count))])
}

fn bump(repeatability: Repeatability) -> RuleDefinition {
    RuleDefinition::new("Bump")
        .with_repeatability(repeatability)
        .when(
            PatternElement::new("n", "Counter")
                .with_condition(Expr::path("n", "count").lt(3)),
        )
        .then(|ctx| {
            let count = match ctx.get("n").and_then(|n| n.get("count")) {
                Some(Value::Int(count)) => *count,
                _ => 0,
            };
            ctx.update("Counter".into(), counter(count + 1))
        })
}

fn counters() -> Vec<FactSchema> {
    vec![FactSchema::new("Counter").with_identity_field("id")]
}

#[test]
fn non_repeatable_fires_once_per_match() {
    let mut session = session_with(vec![bump(Repeatability::NonRepeatable)], counters());
    session.insert("Counter", counter(0)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(session.query("Counter")[0].value, counter(1));
    assert_eq!(session.fire().unwrap(), 0);
}

#[test]
fn repeatable_fires_once_per_rematch() {
    let mut session = session_with(vec![bump(Repeatability::Repeatable)], counters());
    session.insert("Counter", counter(0)).unwrap();
    assert_eq!(session.fire().unwrap(), 3);
    assert_eq!(session.query("Counter")[0].value, counter(3));
}

#[test]
fn non_repeatable_fires_again_after_a_new_identity() {
    let mut session = session_with(vec![bump(Repeatability::NonRepeatable)], counters());
    session.insert("Counter", counter(0)).unwrap();
    session.fire().unwrap();

    session.retract("Counter", counter(1)).unwrap();
    session.insert("Counter", counter(1)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(session.query("Counter")[0].value, counter(2));
}

#[test]
fn key_change_filter_ignores_unrelated_updates() {
    let seen = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&seen);
    let watch = RuleDefinition::new("Watch")
        .when(PatternElement::new("a", "Account"))
        .with_filter(FilterElement::KeyChange(vec![Expr::path("a", "status")]))
        .then(move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });
    let schemas = vec![FactSchema::new("Account").with_identity_field("id")];
    let mut session = session_with(vec![watch], schemas);
    let account = |status: &str, touched: i64| {
        Value::record([
            ("id", Value::from(1)),
            ("status", Value::from(status)),
            ("touched", Value::from(touched)),
        ])
    };

    session.insert("Account", account("open", 0)).unwrap();
    session.fire().unwrap();
    session.update("Account", account("open", 1)).unwrap();
    assert_eq!(session.fire().unwrap(), 0);
    session.update("Account", account("closed", 2)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(*seen.lock().unwrap(), 2);
}

#[test]
fn non_repeatable_match_whose_action_failed_stays_eligible() {
    let attempts = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&attempts);
    let once = RuleDefinition::new("Once")
        .with_repeatability(Repeatability::NonRepeatable)
        .when(PatternElement::new("n", "Counter"))
        .then(move |_| {
            let mut attempts = sink.lock().unwrap();
            *attempts += 1;
            if *attempts == 1 {
                return Err(Error::action("first attempt fails"));
            }
            Ok(())
        });
    let mut session = session_with(vec![once], counters());
    session.subscribe(|event| {
        if let EngineEvent::RhsExpressionFailed(failure) = event {
            failure.handled = true;
        }
    });

    session.insert("Counter", counter(0)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(session.agenda_len(), 0);

    session.update("Counter", counter(1)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    session.update("Counter", counter(2)).unwrap();
    assert_eq!(session.fire().unwrap(), 0);
    assert_eq!(*attempts.lock().unwrap(), 2);
}
