//! The compiled discrimination network.
//!
//! Nodes live in an arena addressed by [`NodeId`]; edges are id lists, so a
//! shared node is simply one with several incoming edges. The network is
//! immutable once built and shared by every session of a factory. Sessions
//! keep all per-node state (alpha memories, beta memories, aggregates).
//!
//! # Module Structure
//!
//! - `builder` - Compiles rule branches into nodes, sharing structurally equal ones
//! - `schema` - Read-only description of the network for diagnostics

mod builder;
mod schema;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kestrel_language::{ActionTrigger, CompiledExpr, RuleDefinition};
use kestrel_storage::{FactType, TypeRegistry};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregatorRegistry;

pub(crate) use builder::NetworkBuilder;
pub use schema::{NetworkSchema, SchemaNode};

// =============================================================================
// Node Identity
// =============================================================================

/// Index of a node in the network arena.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Kind of a network node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    /// Entry point for facts of one type.
    Type,
    /// Single-fact condition.
    Selection,
    /// Facts that passed a selection chain.
    AlphaMemory,
    /// Memory holding the empty root tuple.
    Root,
    /// Joins tuples with facts.
    Join,
    /// Passes tuples with no matching fact.
    Not,
    /// Passes tuples with at least one matching fact.
    Exists,
    /// Appends a computed value to tuples.
    Binding,
    /// Appends aggregation results to tuples.
    Aggregate,
    /// Tuples produced by a beta node.
    BetaMemory,
    /// Feeds the agenda for one rule branch.
    Terminal,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Nodes
// =============================================================================

/// Inputs shared by join-like beta nodes.
#[derive(Clone, Debug)]
pub(crate) struct BetaInput {
    /// Left beta memory (or root).
    pub left: NodeId,
    /// Right alpha memory.
    pub right: NodeId,
    /// Conditions over the left tuple and the right fact.
    pub conditions: Vec<CompiledExpr>,
}

/// Everything an aggregate node needs besides its inputs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct AggregateSpec {
    pub name: Arc<str>,
    pub roles: Vec<Arc<str>>,
    /// Evaluated per source fact, subject = source fact.
    pub expressions: Vec<CompiledExpr>,
    /// Type of the synthetic result facts.
    pub result_type: FactType,
    /// Evaluated per result, subject = result fact.
    pub result_conditions: Vec<CompiledExpr>,
}

#[derive(Clone, Debug)]
pub(crate) enum Op {
    Type(FactType),
    Selection(CompiledExpr),
    AlphaMemory,
    Root,
    Join(BetaInput),
    Not(BetaInput),
    Exists(BetaInput),
    Binding { left: NodeId, expr: CompiledExpr },
    Aggregate { input: BetaInput, spec: Arc<AggregateSpec> },
    BetaMemory,
    Terminal(usize),
}

#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub op: Op,
    /// Downstream nodes. For alpha memories these receive right activations,
    /// for beta memories left activations.
    pub successors: Vec<NodeId>,
    /// Upstream nodes.
    pub inputs: Vec<NodeId>,
    /// Output memory of a beta operator.
    pub memory: Option<NodeId>,
    /// Rules this node serves.
    pub rules: Vec<Arc<str>>,
}

impl Node {
    pub(crate) fn new(op: Op) -> Self {
        Self {
            op,
            successors: Vec::new(),
            inputs: Vec::new(),
            memory: None,
            rules: Vec::new(),
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match &self.op {
            Op::Type(_) => NodeKind::Type,
            Op::Selection(_) => NodeKind::Selection,
            Op::AlphaMemory => NodeKind::AlphaMemory,
            Op::Root => NodeKind::Root,
            Op::Join(_) => NodeKind::Join,
            Op::Not(_) => NodeKind::Not,
            Op::Exists(_) => NodeKind::Exists,
            Op::Binding { .. } => NodeKind::Binding,
            Op::Aggregate { .. } => NodeKind::Aggregate,
            Op::BetaMemory => NodeKind::BetaMemory,
            Op::Terminal(_) => NodeKind::Terminal,
        }
    }

    /// Short human-readable description.
    pub(crate) fn label(&self, terminals: &[Terminal]) -> String {
        fn conditions(exprs: &[CompiledExpr]) -> String {
            exprs
                .iter()
                .map(CompiledExpr::label)
                .collect::<Vec<_>>()
                .join(" && ")
        }
        match &self.op {
            Op::Type(t) => format!("Type {t}"),
            Op::Selection(c) => format!("Selection {c}"),
            Op::AlphaMemory => "AlphaMemory".to_string(),
            Op::Root => "Root".to_string(),
            Op::Join(input) => format!("Join {}", conditions(&input.conditions)),
            Op::Not(input) => format!("Not {}", conditions(&input.conditions)),
            Op::Exists(input) => format!("Exists {}", conditions(&input.conditions)),
            Op::Binding { expr, .. } => format!("Binding {expr}"),
            Op::Aggregate { spec, .. } => format!("Aggregate {} -> {}", spec.name, spec.result_type),
            Op::BetaMemory => "BetaMemory".to_string(),
            Op::Terminal(index) => terminals
                .get(*index)
                .map_or_else(|| "Terminal".to_string(), |t| format!("Terminal {}", t.rule.name)),
        }
    }
}

// =============================================================================
// Terminals
// =============================================================================

#[derive(Clone, Debug)]
pub(crate) enum CompiledPriority {
    Static(i32),
    Dynamic(CompiledExpr),
}

#[derive(Clone, Debug)]
pub(crate) enum CompiledFilter {
    Predicate(CompiledExpr),
    KeyChange(Vec<CompiledExpr>),
}

/// End of one rule branch.
#[derive(Clone, Debug)]
pub(crate) struct Terminal {
    pub node: NodeId,
    pub rule: Arc<RuleDefinition>,
    pub branch: usize,
    /// Declarations in tuple-slot order.
    pub declarations: Vec<Arc<str>>,
    pub priority: CompiledPriority,
    pub filters: Vec<CompiledFilter>,
}

impl Terminal {
    pub(crate) fn has_trigger(&self, trigger: ActionTrigger) -> bool {
        self.rule.actions.iter().any(|a| a.trigger.contains(trigger))
    }
}

// =============================================================================
// Network
// =============================================================================

/// An immutable compiled rule network.
#[derive(Debug)]
pub struct Network {
    pub(crate) nodes: Vec<Node>,
    pub(crate) type_nodes: HashMap<FactType, NodeId>,
    /// Alpha memories reachable from each type node.
    pub(crate) type_memories: HashMap<FactType, Vec<NodeId>>,
    pub(crate) root: NodeId,
    pub(crate) terminals: Vec<Terminal>,
    pub(crate) registry: TypeRegistry,
    pub(crate) aggregators: AggregatorRegistry,
}

impl Network {
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn terminal(&self, index: usize) -> &Terminal {
        &self.terminals[index]
    }

    /// The fact type registry the network was compiled with.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the network has only its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Names of the compiled rules, in definition order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<Arc<str>> {
        let mut names: Vec<Arc<str>> = Vec::new();
        for terminal in &self.terminals {
            if !names.contains(&terminal.rule.name) {
                names.push(Arc::clone(&terminal.rule.name));
            }
        }
        names
    }

    /// Alpha memories a fact of the given type can reach.
    pub(crate) fn alpha_memories_for(&self, fact_type: &FactType) -> Vec<NodeId> {
        let mut memories = Vec::new();
        for declared in self.registry.declared_types(fact_type) {
            if let Some(ids) = self.type_memories.get(&declared) {
                memories.extend(ids.iter().copied());
            }
        }
        memories.sort_unstable();
        memories.dedup();
        memories
    }

    /// Describes the network for diagnostics.
    #[must_use]
    pub fn schema(&self) -> NetworkSchema {
        NetworkSchema::from_network(self)
    }
}
