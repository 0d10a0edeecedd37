//! Collect over a filtered source.

use std::sync::{Arc, Mutex};

use kestrel_foundation::Value;
use kestrel_language::{AggregateElement, Expr, PatternElement, RuleDefinition};

use super::{Seen, len, session_with};

fn customer(name: &str) -> Value {
    Value::record([("name", Value::from(name))])
}

fn valid_customers(seen: &Seen) -> RuleDefinition {
    let sink = Arc::clone(seen);
    RuleDefinition::new("ValidCustomers")
        .when(
            PatternElement::new("all", "Customers").from_aggregate(AggregateElement::collect(
                PatternElement::new("c", "Customer")
                    .with_condition(Expr::path("c", "name").starts_with("Valid")),
            )),
        )
        .then(move |ctx| {
            let all = ctx.get("all").cloned().unwrap_or(Value::Nil);
            sink.lock().unwrap().push(all);
            Ok(())
        })
}

#[test]
fn collection_shrinks_with_one_activation_each_time() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = session_with(vec![valid_customers(&seen)], Vec::new());
    session
        .insert_all([
            ("Customer", customer("Valid1")),
            ("Customer", customer("Valid2")),
            ("Customer", customer("Invalid3")),
        ])
        .unwrap();

    assert_eq!(session.fire().unwrap(), 1);
    session.retract("Customer", customer("Valid1")).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    session.retract("Customer", customer("Valid2")).unwrap();
    assert_eq!(session.fire().unwrap(), 1);
    // No spurious refire.
    assert_eq!(session.fire().unwrap(), 0);

    let sizes: Vec<usize> = seen.lock().unwrap().iter().map(len).collect();
    assert_eq!(sizes, vec![2, 1, 0]);
}

#[test]
fn non_matching_changes_do_not_refire() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = session_with(vec![valid_customers(&seen)], Vec::new());
    session.insert("Customer", customer("Valid1")).unwrap();
    session.fire().unwrap();

    session.insert("Customer", customer("Invalid2")).unwrap();
    session.retract("Customer", customer("Invalid2")).unwrap();
    assert_eq!(session.fire().unwrap(), 0);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn empty_collection_matches_before_any_fact() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let mut session = session_with(vec![valid_customers(&seen)], Vec::new());
    assert_eq!(session.agenda_len(), 1);
    session.fire().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![Value::Vec(Default::default())]);
}

#[test]
fn result_conditions_gate_the_collection() {
    let crowd = RuleDefinition::new("Crowd").when(
        PatternElement::new("all", "Customers")
            .with_condition(Expr::var("all").len().ge(2))
            .from_aggregate(AggregateElement::collect(PatternElement::new("c", "Customer"))),
    );
    let mut session = session_with(vec![crowd], Vec::new());
    session.insert("Customer", customer("A")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.insert("Customer", customer("B")).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.retract("Customer", customer("A")).unwrap();
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn collection_is_scoped_to_the_outer_match() {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let per_customer = RuleDefinition::new("OrdersPerCustomer")
        .when(PatternElement::new("c", "Customer"))
        .when(
            PatternElement::new("orders", "Orders").from_aggregate(AggregateElement::collect(
                PatternElement::new("o", "Order")
                    .with_condition(Expr::path("o", "customer").eq(Expr::path("c", "name"))),
            )),
        )
        .then(move |ctx| {
            let orders = ctx.get("orders").cloned().unwrap_or(Value::Nil);
            sink.lock().unwrap().push(orders);
            Ok(())
        });
    let order = |id: i64, customer: &str| {
        Value::record([("id", Value::from(id)), ("customer", Value::from(customer))])
    };
    let mut session = session_with(vec![per_customer], Vec::new());
    session.insert("Customer", customer("Ada")).unwrap();
    session.insert("Customer", customer("Bob")).unwrap();
    session.insert("Order", order(1, "Ada")).unwrap();
    session.insert("Order", order(2, "Ada")).unwrap();
    session.insert("Order", order(3, "Bob")).unwrap();

    assert_eq!(session.fire().unwrap(), 2);
    let mut sizes: Vec<usize> = seen.lock().unwrap().iter().map(len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);
}
