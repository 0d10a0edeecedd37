//! Rendering compiled networks.

use kestrel_debug::schema::{render_dot, render_rule_dot, render_text};
use kestrel_engine::CompilerOptions;
use kestrel_language::{PatternElement, RuleDefinition};

use super::{compile, valid_customers};

#[test]
fn text_summary_counts_every_node() {
    let factory = compile(vec![valid_customers("A")], CompilerOptions::default());
    let schema = factory.schema();
    let text = render_text(&schema);
    assert_eq!(text.lines().count(), schema.nodes.len() + 1);
    let summary = text.lines().last().unwrap();
    assert!(summary.starts_with(&format!("{} nodes, {} edges", schema.nodes.len(), schema.edge_count())));
    assert!(text.contains("[A]"));
}

#[test]
fn dot_output_per_rule() {
    let orders = RuleDefinition::new("Orders").when(PatternElement::new("o", "Order"));
    let factory = compile(vec![valid_customers("A"), orders], CompilerOptions::default());
    let schema = factory.schema();

    let full = render_dot(&schema);
    assert_eq!(full.matches(" -> ").count(), schema.edge_count());

    let only_orders = render_rule_dot(&schema, "Orders");
    assert!(only_orders.starts_with("digraph \"Orders\""));
    assert!(!only_orders.contains("Customer"));
    assert!(only_orders.contains("Order"));
}
