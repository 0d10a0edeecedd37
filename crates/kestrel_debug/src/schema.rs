//! Text and Graphviz renderings of a compiled network.

use std::fmt::Write;

use kestrel_engine::{NetworkSchema, NodeKind, SchemaNode};

/// Renders one line per node followed by a per-kind summary.
///
/// ```text
/// #0    Root         root  -> #4
/// #1    Type         Customer  -> #2  [Greet]
/// ```
#[must_use]
pub fn render_text(schema: &NetworkSchema) -> String {
    let mut out = String::new();
    for node in &schema.nodes {
        let kind = node.kind.to_string();
        let _ = write!(out, "#{:<4} {kind:<12} {}", node.id, node.label);
        if !node.successors.is_empty() {
            let successors: Vec<_> = node.successors.iter().map(|s| format!("#{s}")).collect();
            let _ = write!(out, "  -> {}", successors.join(", "));
        }
        if !node.rules.is_empty() {
            let rules: Vec<&str> = node.rules.iter().map(|r| &**r).collect();
            let _ = write!(out, "  [{}]", rules.join(", "));
        }
        out.push('\n');
    }
    let summary: Vec<_> = schema
        .counts()
        .into_iter()
        .map(|(kind, count)| format!("{kind}={count}"))
        .collect();
    let _ = writeln!(
        out,
        "{} nodes, {} edges ({})",
        schema.nodes.len(),
        schema.edge_count(),
        summary.join(" ")
    );
    out
}

fn shape(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Type | NodeKind::Root => "house",
        NodeKind::Selection | NodeKind::Binding => "ellipse",
        NodeKind::AlphaMemory | NodeKind::BetaMemory => "box",
        NodeKind::Join | NodeKind::Not | NodeKind::Exists => "diamond",
        NodeKind::Aggregate => "hexagon",
        NodeKind::Terminal => "doubleoctagon",
    }
}

fn dot_escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

fn dot_node(out: &mut String, node: &SchemaNode) {
    let _ = writeln!(
        out,
        "  n{} [shape={}, label=\"{}\\n{}\"];",
        node.id,
        shape(node.kind),
        node.kind,
        dot_escape(&node.label)
    );
}

/// Renders the network as a Graphviz `digraph`.
#[must_use]
pub fn render_dot(schema: &NetworkSchema) -> String {
    let mut out = String::from("digraph kestrel {\n  rankdir=TB;\n");
    for node in &schema.nodes {
        dot_node(&mut out, node);
    }
    for node in &schema.nodes {
        for successor in &node.successors {
            let _ = writeln!(out, "  n{} -> n{successor};", node.id);
        }
    }
    out.push_str("}\n");
    out
}

/// Renders only the nodes serving one rule, with edges between them.
#[must_use]
pub fn render_rule_dot(schema: &NetworkSchema, rule: &str) -> String {
    let ids: Vec<u32> = schema.nodes_for_rule(rule).map(|n| n.id).collect();
    let mut out = format!("digraph \"{}\" {{\n  rankdir=TB;\n", dot_escape(rule));
    for node in schema.nodes_for_rule(rule) {
        dot_node(&mut out, node);
    }
    for node in schema.nodes_for_rule(rule) {
        for successor in node.successors.iter().filter(|s| ids.contains(s)) {
            let _ = writeln!(out, "  n{} -> n{successor};", node.id);
        }
    }
    out.push_str("}\n");
    out
}
