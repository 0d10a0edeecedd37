//! Agenda order under dynamic priorities.

use std::sync::{Arc, Mutex};

use kestrel_foundation::Value;
use kestrel_language::{Expr, FilterElement, PatternElement, RuleDefinition};
use kestrel_storage::FactSchema;

use super::session_with;

type Order = Arc<Mutex<Vec<String>>>;

fn item(name: &str, prio: i64) -> Value {
    Value::record([("name", Value::from(name)), ("prio", Value::from(prio))])
}

fn items() -> Vec<FactSchema> {
    vec![FactSchema::new("Item").with_identity_field("name")]
}

/// Fires by the item's own `prio`; only a change of name requeues it.
fn work(order: &Order) -> RuleDefinition {
    let sink = Arc::clone(order);
    RuleDefinition::new("Work")
        .with_dynamic_priority(Expr::path("p", "prio"))
        .when(PatternElement::new("p", "Item"))
        .with_filter(FilterElement::KeyChange(vec![Expr::path("p", "name")]))
        .then(move |ctx| {
            let name = ctx
                .get("p")
                .and_then(|p| p.get("name"))
                .map(ToString::to_string)
                .unwrap_or_default();
            sink.lock().unwrap().push(format!("Work {name}"));
            Ok(())
        })
}

fn fixed(order: &Order, priority: i32) -> RuleDefinition {
    let sink = Arc::clone(order);
    RuleDefinition::new("Fixed")
        .with_priority(priority)
        .when(PatternElement::new("o", "Other"))
        .then(move |ctx| {
            sink.lock().unwrap().push(ctx.rule_name().to_string());
            Ok(())
        })
}

#[test]
fn updated_priority_is_read_when_popping() {
    let order = Order::default();
    let mut session = session_with(vec![work(&order), fixed(&order, 5)], items());
    session.insert("Item", item("A", 1)).unwrap();
    session.insert("Other", Value::from(1)).unwrap();
    session.update("Item", item("A", 10)).unwrap();

    assert_eq!(session.fire().unwrap(), 2);
    assert_eq!(*order.lock().unwrap(), vec!["Work A", "Fixed"]);
}

#[test]
fn firing_can_reorder_the_rest_of_the_agenda() {
    let order = Order::default();
    let sink = Arc::clone(&order);
    let boost = RuleDefinition::new("Boost")
        .with_priority(100)
        .when(PatternElement::new("b", "Boost"))
        .then(move |ctx| {
            sink.lock().unwrap().push(ctx.rule_name().to_string());
            ctx.update("Item".into(), item("B", 9))
        });
    let mut session = session_with(vec![boost, work(&order)], items());
    session.insert("Item", item("A", 5)).unwrap();
    session.insert("Item", item("B", 3)).unwrap();
    session.insert("Boost", Value::from(1)).unwrap();

    assert_eq!(session.fire().unwrap(), 3);
    assert_eq!(
        *order.lock().unwrap(),
        vec!["Boost", "Work B", "Work A"]
    );
}

#[test]
fn equal_rescored_priorities_stay_fifo() {
    let order = Order::default();
    let mut session = session_with(vec![work(&order)], items());
    session.insert("Item", item("A", 1)).unwrap();
    session.insert("Item", item("B", 2)).unwrap();
    session.update("Item", item("A", 2)).unwrap();

    session.fire().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["Work A", "Work B"]);
}
