//! Bulk operations are all-or-nothing.

use std::sync::{Arc, Mutex};

use kestrel::prelude::*;

use super::{big_ratio, factory, ratio};

fn schema_session(config: SessionConfig) -> Session {
    let mut repository = RuleRepository::new();
    repository
        .register_schema(FactSchema::new("Ratio").with_identity_field("id"))
        .unwrap();
    repository.add_rule(big_ratio()).unwrap();
    repository.compile().unwrap().create_session_with(config).unwrap()
}

fn keyed(id: i64, a: i64, b: i64) -> Value {
    Value::record([
        ("id", Value::from(id)),
        ("a", Value::from(a)),
        ("b", Value::from(b)),
    ])
}

#[test]
fn duplicate_in_batch_inserts_nothing() {
    let mut session = schema_session(SessionConfig::default());
    let err = session
        .insert_all([("Ratio", keyed(1, 4, 1)), ("Ratio", keyed(1, 9, 1))])
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateFact { .. }));
    assert_eq!(session.fact_count(), 0);
}

#[test]
fn failing_member_rolls_back_the_batch() {
    let mut session = factory(vec![big_ratio()]).create_session().unwrap();
    let err = session
        .insert_all([("Ratio", ratio(4, 1)), ("Ratio", ratio(1, 0))])
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::LhsEvaluation { .. }));
    assert_eq!(session.fact_count(), 0);
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn update_and_retract_batches() {
    let mut session = schema_session(SessionConfig::default());
    session
        .insert_all([("Ratio", keyed(1, 4, 1)), ("Ratio", keyed(2, 1, 1))])
        .unwrap();
    assert_eq!(session.agenda_len(), 1);

    session
        .update_all([("Ratio", keyed(1, 1, 1)), ("Ratio", keyed(2, 8, 2))])
        .unwrap();
    let matched: Vec<_> = session.agenda().iter().map(|a| a.facts[0].value.clone()).collect();
    assert_eq!(matched, vec![keyed(2, 8, 2)]);

    let err = session
        .retract_all([("Ratio", keyed(2, 8, 2)), ("Ratio", keyed(3, 0, 1))])
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownFact { .. }));
    assert_eq!(session.fact_count(), 2);

    session
        .retract_all([("Ratio", keyed(1, 1, 1)), ("Ratio", keyed(2, 8, 2))])
        .unwrap();
    assert_eq!(session.fact_count(), 0);
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn agenda_events_can_be_deferred_to_the_end_of_a_batch() {
    for defer in [true, false] {
        let config = SessionConfig::default().with_defer_bulk_agenda_events(defer);
        let mut session = schema_session(config);
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        session.subscribe(move |event| {
            sink.lock().unwrap().push(event.name());
        });
        session
            .insert_all([("Ratio", keyed(1, 4, 1)), ("Ratio", keyed(2, 9, 1))])
            .unwrap();

        let log = log.lock().unwrap();
        let first_created = log.iter().position(|n| *n == "ActivationCreated");
        let last_inserted = log.iter().rposition(|n| *n == "FactInserted");
        assert_eq!(log.iter().filter(|n| **n == "ActivationCreated").count(), 2);
        if defer {
            assert!(first_created > last_inserted);
        } else {
            assert!(first_created < last_inserted);
        }
    }
}
