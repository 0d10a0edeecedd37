//! Linked facts live as long as one of their source activations.

use kestrel_foundation::{ErrorKind, Value};
use kestrel_language::{Expr, PatternElement, RuleDefinition};

use super::{person, session_with};

fn inhabited_cities() -> RuleDefinition {
    RuleDefinition::new("Inhabited")
        .when(PatternElement::new("p", "Person"))
        .then(|ctx| {
            let city = ctx.get("p").and_then(|p| p.get("city")).cloned().unwrap_or(Value::Nil);
            let fact = Value::record([("city", city.clone())]);
            ctx.insert_linked(city, "InhabitedCity".into(), fact)
        })
}

#[test]
fn shared_key_survives_until_last_source_goes() {
    let mut session = session_with(vec![inhabited_cities()]);
    session
        .insert_all([
            ("Person", person("Ada", "Paris")),
            ("Person", person("Bob", "Paris")),
        ])
        .unwrap();
    assert_eq!(session.fire().unwrap(), 2);
    assert_eq!(session.query("InhabitedCity").len(), 1);
    assert!(session.linked_fact("Inhabited", &Value::from("Paris")).is_some());

    session.retract("Person", person("Ada", "Paris")).unwrap();
    assert_eq!(session.query("InhabitedCity").len(), 1);

    session.retract("Person", person("Bob", "Paris")).unwrap();
    assert!(session.query("InhabitedCity").is_empty());
    assert!(session.linked_fact("Inhabited", &Value::from("Paris")).is_none());
}

#[test]
fn moving_the_only_source_moves_the_fact() {
    let mut session = session_with(vec![inhabited_cities()]);
    session.insert("Person", person("Ada", "Paris")).unwrap();
    session.fire().unwrap();

    session.update("Person", person("Ada", "Rome")).unwrap();
    session.fire().unwrap();
    let cities: Vec<Value> = session
        .query("InhabitedCity")
        .iter()
        .filter_map(|f| f.value.get("city").cloned())
        .collect();
    // Paris stays while the activation that upserted it is still live.
    assert!(cities.contains(&Value::from("Rome")));
    assert!(cities.contains(&Value::from("Paris")));
}

#[test]
fn linked_facts_feed_other_rules() {
    let tourist_spot = RuleDefinition::new("TouristSpot")
        .when(
            PatternElement::new("c", "InhabitedCity")
                .with_condition(Expr::path("c", "city").eq("Paris")),
        )
        .then(|ctx| ctx.insert("Spot".into(), Value::from("Paris")));
    let mut session = session_with(vec![inhabited_cities(), tourist_spot]);
    session.insert("Person", person("Ada", "Paris")).unwrap();
    assert_eq!(session.fire().unwrap(), 2);
    assert_eq!(session.query("Spot").len(), 1);
}

#[test]
fn linked_facts_cannot_be_changed_directly() {
    let mut session = session_with(vec![inhabited_cities()]);
    session.insert("Person", person("Ada", "Paris")).unwrap();
    session.fire().unwrap();

    let linked = Value::record([("city", Value::from("Paris"))]);
    let err = session.retract("InhabitedCity", linked).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
    assert_eq!(session.query("InhabitedCity").len(), 1);
}
