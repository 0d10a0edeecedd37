//! User-registered aggregators.

use std::collections::BTreeSet;
use std::sync::Arc;

use kestrel_engine::{AggregateInput, AggregationResult, Aggregator, RuleRepository};
use kestrel_foundation::{Error, FactId, Value};
use kestrel_language::{AggregateElement, Expr, PatternElement, RuleDefinition};

/// Number of matching facts, reported even when zero.
#[derive(Clone, Debug, Default)]
struct Count {
    facts: BTreeSet<FactId>,
}

impl Count {
    fn count(&self) -> Value {
        Value::from(self.facts.len())
    }

    fn change(&mut self, apply: impl FnOnce(&mut BTreeSet<FactId>)) -> Vec<AggregationResult> {
        let before = self.count();
        apply(&mut self.facts);
        let after = self.count();
        if before == after {
            return Vec::new();
        }
        let source = self.facts.iter().copied().collect();
        vec![AggregationResult::modified(Value::Nil, before, after, source)]
    }
}

impl Aggregator for Count {
    fn initial(&mut self) -> Vec<AggregationResult> {
        vec![AggregationResult::added(Value::Nil, self.count(), Vec::new())]
    }

    fn add(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|facts| facts.extend(inputs.iter().map(|i| i.fact)))
    }

    fn modify(&mut self, _inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        Vec::new()
    }

    fn remove(&mut self, inputs: &[AggregateInput]) -> Vec<AggregationResult> {
        self.change(|facts| {
            for input in inputs {
                facts.remove(&input.fact);
            }
        })
    }

    fn clone_box(&self) -> Box<dyn Aggregator> {
        Box::new(self.clone())
    }
}

fn repository() -> RuleRepository {
    let mut repository = RuleRepository::new();
    repository.register_aggregator("Count", |roles: &[Arc<str>]| {
        if roles.is_empty() {
            Ok(Box::new(Count::default()) as Box<dyn Aggregator>)
        } else {
            Err(Error::invalid_argument("Count takes no expressions"))
        }
    });
    repository
}

#[test]
fn custom_aggregator_drives_activations() {
    let mut repository = repository();
    repository
        .add_rule(
            RuleDefinition::new("Busy").when(
                PatternElement::new("n", "OrderCount")
                    .with_condition(Expr::var("n").ge(2))
                    .from_aggregate(AggregateElement::new(
                        "Count",
                        PatternElement::new("o", "Order"),
                    )),
            ),
        )
        .unwrap();
    let mut session = repository.compile().unwrap().create_session().unwrap();

    session.insert("Order", Value::from(1)).unwrap();
    assert_eq!(session.agenda_len(), 0);
    session.insert("Order", Value::from(2)).unwrap();
    assert_eq!(session.agenda_len(), 1);
    session.retract("Order", Value::from(1)).unwrap();
    assert_eq!(session.agenda_len(), 0);
}

#[test]
fn unsupported_roles_fail_compilation() {
    let mut repository = repository();
    repository
        .add_rule(
            RuleDefinition::new("Bad").when(
                PatternElement::new("n", "OrderCount").from_aggregate(
                    AggregateElement::new("Count", PatternElement::new("o", "Order"))
                        .with_expression("key", Expr::path("o", "id")),
                ),
            ),
        )
        .unwrap();
    assert!(repository.compile().is_err());
}

#[test]
fn unknown_aggregator_fails_compilation() {
    let mut repository = RuleRepository::new();
    repository
        .add_rule(RuleDefinition::new("Bad").when(
            PatternElement::new("n", "Thing").from_aggregate(AggregateElement::new(
                "Median",
                PatternElement::new("o", "Order"),
            )),
        ))
        .unwrap();
    assert!(repository.compile().is_err());
}
