//! Failures in conditions, filters, and actions.

use kestrel::engine::EngineEvent;
use kestrel::prelude::*;

use super::{big_ratio, factory, ratio};

fn handle_all(session: &mut Session) {
    session.subscribe(|event| match event {
        EngineEvent::LhsExpressionFailed(f)
        | EngineEvent::AgendaExpressionFailed(f)
        | EngineEvent::RhsExpressionFailed(f) => f.handled = true,
        _ => {}
    });
}

#[test]
fn condition_failure_rolls_back_the_insert() {
    let mut session = factory(vec![big_ratio()]).create_session().unwrap();
    session.insert("Ratio", ratio(4, 2)).unwrap();

    let err = session.insert("Ratio", ratio(1, 0)).unwrap_err();
    match &err.kind {
        ErrorKind::LhsEvaluation { rule, .. } => assert_eq!(rule, "BigRatio"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.fact_count(), 1);
    assert_eq!(session.agenda_len(), 1);
    // The session stays usable.
    assert_eq!(session.fire().unwrap(), 1);
}

#[test]
fn handled_condition_failure_is_a_non_match() {
    let mut session = factory(vec![big_ratio()]).create_session().unwrap();
    handle_all(&mut session);
    session.insert("Ratio", ratio(1, 0)).unwrap();
    assert_eq!(session.fact_count(), 1);
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn action_failure_keeps_the_activation() {
    let failing = RuleDefinition::new("Fails")
        .when(PatternElement::new("x", "Thing"))
        .then(|ctx| {
            ctx.insert("Side".into(), Value::from(1))?;
            Err(Error::invalid_argument("refused"))
        });
    let mut session = factory(vec![failing]).create_session().unwrap();
    session.insert("Thing", Value::from(1)).unwrap();

    let err = session.fire().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RhsEvaluation { .. }));
    assert_eq!(session.agenda_len(), 1);
    // The partial effects of the failed action were undone.
    assert!(session.query("Side").is_empty());
}

#[test]
fn handled_action_failure_consumes_the_activation() {
    let failing = RuleDefinition::new("Fails")
        .when(PatternElement::new("x", "Thing"))
        .then(|_| Err(Error::invalid_argument("refused")));
    let mut session = factory(vec![failing]).create_session().unwrap();
    handle_all(&mut session);
    session.insert("Thing", Value::from(1)).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    assert_eq!(session.agenda_len(), 0);
}

/// Flags every thing through a linked fact, then fails.
fn flag_then_fail() -> RuleDefinition {
    RuleDefinition::new("Flag")
        .when(PatternElement::new("x", "Thing"))
        .then(|ctx| {
            let thing = ctx.get("x").cloned().unwrap_or(Value::Nil);
            ctx.insert_linked(thing.clone(), "Flagged".into(), thing.clone())?;
            ctx.queue_insert_linked(Value::from("later"), "Flagged".into(), thing);
            Err(Error::invalid_argument("refused"))
        })
}

/// Counts flagged things, so a leaked linked fact would leave an activation.
fn count_flagged() -> RuleDefinition {
    RuleDefinition::new("CountFlagged").when(PatternElement::new("f", "Flagged"))
}

#[test]
fn action_failure_rolls_back_linked_facts() {
    let mut session = factory(vec![flag_then_fail(), count_flagged()])
        .create_session()
        .unwrap();
    session.insert("Thing", Value::from(1)).unwrap();

    let err = session.fire().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RhsEvaluation { .. }));
    assert!(session.query("Flagged").is_empty());
    assert!(session.linked_fact("Flag", &Value::from(1)).is_none());
    assert_eq!(session.queued_linked(), 0);
    let pending: Vec<String> = session.agenda().iter().map(|a| a.rule.to_string()).collect();
    assert_eq!(pending, vec!["Flag"]);
}

#[test]
fn handled_action_failure_still_rolls_back_linked_facts() {
    let mut session = factory(vec![flag_then_fail(), count_flagged()])
        .create_session()
        .unwrap();
    handle_all(&mut session);
    session.insert("Thing", Value::from(1)).unwrap();

    assert_eq!(session.fire().unwrap(), 1);
    assert!(session.query("Flagged").is_empty());
    assert_eq!(session.queued_linked(), 0);
    assert_eq!(session.agenda_len(), 0);
    assert!(session.propagate_linked().unwrap().is_empty());
}

#[test]
fn filter_failure_and_recovery() {
    let filtered = || {
        RuleDefinition::new("Filtered")
            .when(PatternElement::new("r", "Ratio"))
            .with_filter(FilterElement::Predicate(
                Expr::path("r", "a").div(Expr::path("r", "b")).gt(0),
            ))
    };

    let mut session = factory(vec![filtered()]).create_session().unwrap();
    let err = session.insert("Ratio", ratio(1, 0)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::AgendaEvaluation { .. }));
    assert_eq!(session.fact_count(), 0);

    let mut session = factory(vec![filtered()]).create_session().unwrap();
    handle_all(&mut session);
    session.insert("Ratio", ratio(1, 0)).unwrap();
    session.insert("Ratio", ratio(2, 1)).unwrap();
    assert_eq!(session.agenda_len(), 1);
}

#[test]
fn firing_limit_stops_runaway_rules() {
    let runaway = RuleDefinition::new("Runaway")
        .when(PatternElement::new("n", "Counter"))
        .then(|ctx| {
            let next = match ctx.get("n") {
                Some(Value::Int(n)) => n + 1,
                _ => 0,
            };
            ctx.insert("Counter".into(), Value::from(next))
        });
    let mut session = factory(vec![runaway])
        .create_session_with(SessionConfig::default().with_max_firings(5))
        .unwrap();
    session.insert("Counter", Value::from(0)).unwrap();
    let err = session.fire().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::LimitExceeded(_)));
    assert_eq!(session.query("Counter").len(), 6);
}
