//! Convergence and identity errors.

use kestrel_foundation::{ErrorKind, Value};
use kestrel_language::{Expr, PatternElement, RuleDefinition};
use kestrel_storage::FactSchema;

use super::{named, session_with};

fn greet() -> RuleDefinition {
    RuleDefinition::new("Greet")
        .when(PatternElement::new("c", "Customer"))
        .then(|ctx| {
            let name = ctx
                .get("c")
                .and_then(|c| c.get("name"))
                .cloned()
                .unwrap_or(Value::Nil);
            ctx.insert("Greeting".into(), name)
        })
}

#[test]
fn second_fire_does_nothing() {
    let mut session = session_with(vec![greet()], Vec::new());
    for name in ["Ada", "Bob", "Cy"] {
        session.insert("Customer", named(name)).unwrap();
    }
    assert_eq!(session.fire().unwrap(), 3);
    assert_eq!(session.fire().unwrap(), 0);
    assert_eq!(session.query("Greeting").len(), 3);
}

#[test]
fn chained_rules_run_to_a_fixpoint() {
    let thank = RuleDefinition::new("Thank")
        .when(PatternElement::new("g", "Greeting"))
        .then(|ctx| {
            let g = ctx.get("g").cloned().unwrap_or(Value::Nil);
            ctx.insert("Thanks".into(), g)
        });
    let mut session = session_with(vec![greet(), thank], Vec::new());
    session.insert("Customer", named("Ada")).unwrap();
    assert_eq!(session.fire().unwrap(), 2);
    assert_eq!(session.query("Thanks").len(), 1);
    assert_eq!(session.fire().unwrap(), 0);
}

#[test]
fn duplicate_and_unknown_identities() {
    let mut session = session_with(vec![greet()], Vec::new());
    session.insert("Customer", named("Ada")).unwrap();

    let err = session.insert("Customer", named("Ada")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateFact { .. }));
    let err = session.update("Customer", named("Zed")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownFact { .. }));
    let err = session.retract("Order", named("Ada")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownFact { .. }));

    // Nothing changed.
    assert_eq!(session.fact_count(), 1);
    assert_eq!(session.agenda_len(), 1);
}

#[test]
fn identity_field_allows_updates() {
    let schema = FactSchema::new("Account").with_identity_field("id");
    let rich = RuleDefinition::new("Rich").when(
        PatternElement::new("a", "Account").with_condition(Expr::path("a", "balance").gt(100)),
    );
    let mut session = session_with(vec![rich], vec![schema]);
    let account = |balance: i64| {
        Value::record([("id", Value::from(1)), ("balance", Value::from(balance))])
    };

    session.insert("Account", account(10)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.update("Account", account(500)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    let err = session.insert("Account", account(7)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateFact { .. }));
    session.update("Account", account(50)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    assert_eq!(session.query("Account")[0].value, account(50));
}

#[test]
fn retracting_a_matched_fact_removes_its_activation() {
    let mut session = session_with(vec![greet()], Vec::new());
    session.insert("Customer", named("Ada")).unwrap();
    session.retract("Customer", named("Ada")).unwrap();
    assert_eq!(session.agenda_len(), 0);
    assert_eq!(session.fire().unwrap(), 0);
    assert!(session.query("Greeting").is_empty());
}

mod proptests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn fire_reaches_a_fixpoint(
            names in prop::collection::vec("[a-e]{1,2}", 0..12),
            retracted in prop::collection::vec(any::<bool>(), 12),
        ) {
            let mut session = session_with(vec![greet()], Vec::new());
            let distinct: BTreeSet<String> = names.into_iter().collect();
            for name in &distinct {
                session.insert("Customer", named(name)).unwrap();
            }
            let mut live = 0;
            for (name, retract) in distinct.iter().zip(&retracted) {
                if *retract {
                    session.retract("Customer", named(name)).unwrap();
                } else {
                    live += 1;
                }
            }
            live += distinct.len().saturating_sub(retracted.len());

            prop_assert_eq!(session.fire().unwrap(), live);
            prop_assert_eq!(session.fire().unwrap(), 0);
            prop_assert_eq!(session.query("Greeting").len(), live);
        }
    }
}
