//! Node sharing across rules, seen through the public schema.

use kestrel_engine::{CompilerOptions, NodeKind};
use kestrel_foundation::Value;
use kestrel_language::{Expr, PatternElement, RuleDefinition};

use super::{compile, valid_customers};

fn customer(name: &str) -> Value {
    Value::record([("name", Value::from(name))])
}

#[test]
fn identical_rules_share_the_alpha_side() {
    let factory = compile(
        vec![valid_customers("A"), valid_customers("B")],
        CompilerOptions::default(),
    );
    let schema = factory.schema();
    assert_eq!(schema.count(NodeKind::Selection), 1);
    assert_eq!(schema.count(NodeKind::AlphaMemory), 1);
    assert_eq!(schema.count(NodeKind::Terminal), 2);

    let shared = schema
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::Selection)
        .unwrap();
    assert_eq!(shared.rules.len(), 2);
}

#[test]
fn unshared_networks_behave_the_same() {
    let rules = || vec![valid_customers("A"), valid_customers("B")];
    let shared = compile(rules(), CompilerOptions::default());
    let unshared = compile(rules(), CompilerOptions::default().with_share_nodes(false));
    assert!(unshared.schema().nodes.len() > shared.schema().nodes.len());

    for factory in [shared, unshared] {
        let mut session = factory.create_session().unwrap();
        session.insert("Customer", customer("Valid1")).unwrap();
        session.insert("Customer", customer("Other")).unwrap();
        assert_eq!(session.agenda_len(), 2);
        assert_eq!(session.fire().unwrap(), 2);
    }
}

#[test]
fn different_outer_references_stay_apart() {
    let rule = |name: &str, target: &str| {
        RuleDefinition::new(name)
            .when(PatternElement::new("a", "Customer"))
            .when(PatternElement::new("b", "Customer"))
            .when(
                PatternElement::new("o", "Order")
                    .with_condition(Expr::path("o", "customer").eq(Expr::path(target, "name"))),
            )
    };
    let factory = compile(vec![rule("A", "a"), rule("B", "b")], CompilerOptions::default());
    assert_eq!(factory.schema().count(NodeKind::Join), 4);

    let mut session = factory.create_session().unwrap();
    session.insert("Customer", customer("Ada")).unwrap();
    session.insert("Customer", customer("Bob")).unwrap();
    session
        .insert(
            "Order",
            Value::record([("id", Value::from(1)), ("customer", Value::from("Ada"))]),
        )
        .unwrap();
    // Of the four customer pairs, two put Ada in the slot each rule references.
    let per_rule = |rule: &str| {
        session
            .agenda()
            .iter()
            .filter(|a| &*a.rule == rule)
            .count()
    };
    assert_eq!(per_rule("A"), 2);
    assert_eq!(per_rule("B"), 2);
}

#[test]
fn sessions_share_one_network() {
    let factory = compile(vec![valid_customers("A")], CompilerOptions::default());
    let mut first = factory.create_session().unwrap();
    let second = factory.create_session().unwrap();
    first.insert("Customer", customer("Valid1")).unwrap();
    assert_eq!(first.agenda_len(), 1);
    assert_eq!(second.agenda_len(), 0);
    assert_eq!(first.schema(), second.schema());
}
