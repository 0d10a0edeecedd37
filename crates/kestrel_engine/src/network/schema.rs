//! Read-only description of a compiled network.

use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Network, NodeId, NodeKind};

/// One node of a [`NetworkSchema`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SchemaNode {
    /// Node id.
    pub id: u32,
    /// Node kind.
    pub kind: NodeKind,
    /// Human-readable description.
    pub label: String,
    /// Ids of downstream nodes.
    pub successors: Vec<u32>,
    /// Rules the node serves.
    pub rules: Vec<Arc<str>>,
}

/// Nodes and edges of a network.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NetworkSchema {
    /// Nodes in id order.
    pub nodes: Vec<SchemaNode>,
}

impl NetworkSchema {
    pub(crate) fn from_network(network: &Network) -> Self {
        let nodes = network
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| SchemaNode {
                id: u32::try_from(index).unwrap_or(u32::MAX),
                kind: node.kind(),
                label: node.label(&network.terminals),
                successors: node.successors.iter().map(|s| s.0).collect(),
                rules: node.rules.clone(),
            })
            .collect();
        Self { nodes }
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&SchemaNode> {
        self.nodes.get(id.index())
    }

    /// Number of nodes of a kind.
    #[must_use]
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind == kind).count()
    }

    /// Node counts per kind.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<NodeKind, usize> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Nodes serving a rule.
    pub fn nodes_for_rule<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a SchemaNode> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.rules.iter().any(|r| &**r == rule))
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(|n| n.successors.len()).sum()
    }
}
