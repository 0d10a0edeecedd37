//! Not, Exists, and ForAll boundaries.

use std::sync::{Arc, Mutex};

use kestrel_foundation::Value;
use kestrel_language::{Expr, PatternElement, RuleDefinition, RuleElement};

use super::{named, session_with};

fn order(id: i64, customer: &str) -> Value {
    Value::record([("id", Value::from(id)), ("customer", Value::from(customer))])
}

fn orders_of_c() -> PatternElement {
    PatternElement::new("o", "Order")
        .with_condition(Expr::path("o", "customer").eq(Expr::path("c", "name")))
}

fn counting(session: &mut kestrel_engine::Session) -> Arc<Mutex<Vec<&'static str>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    session.subscribe(move |event| {
        if event.is_agenda_event() {
            sink.lock().unwrap().push(event.name());
        }
    });
    log
}

#[test]
fn not_transitions_only_at_zero() {
    let idle = RuleDefinition::new("Idle")
        .when(PatternElement::new("c", "Customer"))
        .when(RuleElement::Not(orders_of_c()));
    let mut session = session_with(vec![idle], Vec::new());
    let log = counting(&mut session);

    session.insert("Customer", named("Ada")).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.insert("Order", order(1, "Ada")).unwrap();
    session.insert("Order", order(2, "Ada")).unwrap();
    session.insert("Order", order(3, "Bob")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.retract("Order", order(1, "Ada")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.retract("Order", order(2, "Ada")).unwrap();
    assert_eq!(session.agenda_len(), 1);

    assert_eq!(
        *log.lock().unwrap(),
        vec!["ActivationCreated", "ActivationDeleted", "ActivationCreated"]
    );
}

#[test]
fn exists_transitions_only_at_one() {
    let active = RuleDefinition::new("Active")
        .when(PatternElement::new("c", "Customer"))
        .when(RuleElement::Exists(orders_of_c()));
    let mut session = session_with(vec![active], Vec::new());
    let log = counting(&mut session);

    session.insert("Customer", named("Ada")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.insert("Order", order(1, "Ada")).unwrap();
    session.insert("Order", order(2, "Ada")).unwrap();
    assert_eq!(session.agenda_len(), 1);
    assert_eq!(session.fire().unwrap(), 1);

    session.retract("Order", order(2, "Ada")).unwrap();
    assert_eq!(session.fire().unwrap(), 0);
    session.retract("Order", order(1, "Ada")).unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["ActivationCreated", "ActivationDeleted"]
    );
}

#[test]
fn exists_does_not_bind_the_matched_fact() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let active = RuleDefinition::new("Active")
        .when(PatternElement::new("c", "Customer"))
        .when(RuleElement::Exists(orders_of_c()))
        .then(move |ctx| {
            sink.lock().unwrap().push(ctx.get("o").is_some());
            Ok(())
        });
    let mut session = session_with(vec![active], Vec::new());
    session.insert("Customer", named("Ada")).unwrap();
    session.insert("Order", order(1, "Ada")).unwrap();
    session.fire().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![false]);
}

#[test]
fn for_all_holds_until_a_counterexample() {
    let all_paid = RuleDefinition::new("AllPaid").when(RuleElement::ForAll {
        base: PatternElement::new("i", "Invoice"),
        patterns: vec![
            PatternElement::new("i", "Invoice")
                .with_condition(Expr::path("i", "paid").eq(true)),
        ],
    });
    let mut session = session_with(vec![all_paid], Vec::new());
    let invoice = |id: i64, paid: bool| {
        Value::record([("id", Value::from(id)), ("paid", Value::from(paid))])
    };

    // Vacuously true.
    assert_eq!(session.agenda_len(), 1);
    session.insert("Invoice", invoice(1, true)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.insert("Invoice", invoice(2, false)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.retract("Invoice", invoice(2, false)).unwrap();
    assert_eq!(session.agenda_len(), 1);
}
