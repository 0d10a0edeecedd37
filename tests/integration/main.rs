//! End-to-end tests across every layer.
//!
//! Tests failure isolation, tracing, bulk operations, and concurrent
//! sessions through the `kestrel` facade.

mod bulk;
mod failures;
mod threads;
mod traced;

use kestrel::prelude::*;

/// Compiles the rules into a factory.
pub fn factory(rules: Vec<RuleDefinition>) -> SessionFactory {
    let mut repository = RuleRepository::new();
    repository.add_rules(rules).unwrap();
    repository.compile().unwrap()
}

/// A ratio fact; conditions dividing by `b` fail when it is zero.
pub fn ratio(a: i64, b: i64) -> Value {
    Value::record([("a", Value::from(a)), ("b", Value::from(b))])
}

/// A rule matching ratios above one.
pub fn big_ratio() -> RuleDefinition {
    RuleDefinition::new("BigRatio")
        .when(
            PatternElement::new("r", "Ratio")
                .with_condition(Expr::path("r", "a").div(Expr::path("r", "b")).gt(1)),
        )
        .then(|ctx| {
            let ratio = ctx.get("r").cloned().unwrap_or(Value::Nil);
            ctx.insert("Big".into(), ratio)
        })
}
