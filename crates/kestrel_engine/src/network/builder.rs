//! Rule compilation into network nodes.
//!
//! Each rule is expanded into linear branches; every branch becomes a chain
//! of alpha and beta nodes ending in its own terminal. With sharing enabled,
//! a node is reused whenever its structural key (kind, inputs, bound
//! expressions) matches an existing node, so common prefixes of rules and
//! branches are evaluated once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use kestrel_foundation::{ErrorContext, Result};
use kestrel_language::declaration::{BranchElement, RuleBranch, expand};
use kestrel_language::{
    AggregateElement, CompiledExpr, Expr, FilterElement, PatternElement, Priority, RuleDefinition,
    Scope,
};
use kestrel_storage::{FactType, TypeRegistry};
use tracing::debug;

use super::{
    AggregateSpec, BetaInput, CompiledFilter, CompiledPriority, Network, Node, NodeId, Op,
    Terminal,
};
use crate::aggregate::AggregatorRegistry;
use crate::config::CompilerOptions;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum BetaKind {
    Join,
    Not,
    Exists,
}

/// Structural identity of a shareable node.
#[derive(Clone, PartialEq, Eq, Hash)]
enum ShareKey {
    Selection(NodeId, CompiledExpr),
    AlphaMemory(NodeId),
    Beta(BetaKind, NodeId, NodeId, Vec<CompiledExpr>),
    Binding(NodeId, CompiledExpr),
    Aggregate(NodeId, NodeId, Vec<CompiledExpr>, AggregateSpec),
}

/// Splits pattern conditions into alpha (own declaration only) and join conditions.
fn split(pattern: &PatternElement) -> (Vec<&Expr>, Vec<&Expr>) {
    pattern
        .conditions
        .iter()
        .partition(|c| c.free_vars().iter().all(|v| *v == pattern.declaration))
}

fn compile_all<'a>(
    exprs: impl IntoIterator<Item = &'a Expr>,
    scope: &Scope,
) -> Result<Vec<CompiledExpr>> {
    exprs
        .into_iter()
        .map(|e| CompiledExpr::new(e, scope))
        .collect()
}

/// Incrementally builds a [`Network`].
pub(crate) struct NetworkBuilder {
    options: CompilerOptions,
    registry: TypeRegistry,
    aggregators: AggregatorRegistry,
    nodes: Vec<Node>,
    type_nodes: HashMap<FactType, NodeId>,
    shared: HashMap<ShareKey, NodeId>,
    root: NodeId,
    terminals: Vec<Terminal>,
}

impl NetworkBuilder {
    pub(crate) fn new(
        options: CompilerOptions,
        registry: TypeRegistry,
        aggregators: AggregatorRegistry,
    ) -> Self {
        Self {
            options,
            registry,
            aggregators,
            nodes: vec![Node::new(Op::Root)],
            type_nodes: HashMap::new(),
            shared: HashMap::new(),
            root: NodeId(0),
            terminals: Vec::new(),
        }
    }

    /// Compiles one rule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for malformed rules or unknown aggregators.
    pub(crate) fn add_rule(&mut self, rule: RuleDefinition) -> Result<()> {
        let rule = Arc::new(rule);
        let context = || ErrorContext::new().with_rule(&*rule.name);
        let branches = expand(&rule).map_err(|e| e.with_context(context()))?;
        for (index, branch) in branches.iter().enumerate() {
            self.add_branch(&rule, index, branch)
                .map_err(|e| e.with_context(context()))?;
        }
        Ok(())
    }

    /// Finishes the network.
    pub(crate) fn build(mut self) -> Network {
        self.assign_rules();
        let mut type_memories = HashMap::new();
        for (fact_type, &node) in &self.type_nodes {
            let mut memories = Vec::new();
            self.collect_memories(node, &mut memories);
            memories.sort_unstable();
            memories.dedup();
            type_memories.insert(fact_type.clone(), memories);
        }
        debug!(
            nodes = self.nodes.len(),
            terminals = self.terminals.len(),
            "compiled rule network"
        );
        Network {
            nodes: self.nodes,
            type_nodes: self.type_nodes,
            type_memories,
            root: self.root,
            terminals: self.terminals,
            registry: self.registry,
            aggregators: self.aggregators,
        }
    }

    // -------------------------------------------------------------------------
    // Node allocation
    // -------------------------------------------------------------------------

    fn push(&mut self, op: Op, inputs: &[NodeId]) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        let mut node = Node::new(op);
        node.inputs = inputs.to_vec();
        self.nodes.push(node);
        for input in inputs {
            self.nodes[input.index()].successors.push(id);
        }
        id
    }

    /// Pushes a beta operator followed by its output memory.
    fn push_operator(&mut self, op: Op, inputs: &[NodeId]) -> NodeId {
        let id = self.push(op, inputs);
        let memory = self.push(Op::BetaMemory, &[id]);
        self.nodes[id.index()].memory = Some(memory);
        id
    }

    fn output(&self, operator: NodeId) -> NodeId {
        self.nodes[operator.index()].memory.unwrap_or(operator)
    }

    fn shared_or(&mut self, key: ShareKey, make: impl FnOnce(&mut Self) -> NodeId) -> NodeId {
        if !self.options.share_nodes {
            return make(self);
        }
        if let Some(&id) = self.shared.get(&key) {
            return id;
        }
        let id = make(self);
        self.shared.insert(key, id);
        id
    }

    fn type_node(&mut self, fact_type: &FactType) -> NodeId {
        if let Some(&id) = self.type_nodes.get(fact_type) {
            return id;
        }
        let id = self.push(Op::Type(fact_type.clone()), &[]);
        self.type_nodes.insert(fact_type.clone(), id);
        id
    }

    // -------------------------------------------------------------------------
    // Branch compilation
    // -------------------------------------------------------------------------

    fn add_branch(
        &mut self,
        rule: &Arc<RuleDefinition>,
        index: usize,
        branch: &RuleBranch,
    ) -> Result<()> {
        let mut memory = self.root;
        let mut outer: Vec<Arc<str>> = Vec::new();
        for element in &branch.elements {
            memory = match element {
                BranchElement::Pattern(pattern) => {
                    let next = match &pattern.source {
                        Some(aggregate) => self.aggregate(memory, pattern, aggregate, &outer)?,
                        None => self.pattern(BetaKind::Join, memory, pattern, &outer)?,
                    };
                    outer.push(Arc::clone(&pattern.declaration));
                    next
                }
                BranchElement::Not(pattern) => self.pattern(BetaKind::Not, memory, pattern, &outer)?,
                BranchElement::Exists(pattern) => {
                    self.pattern(BetaKind::Exists, memory, pattern, &outer)?
                }
                BranchElement::Binding(binding) => {
                    let expr = CompiledExpr::new(&binding.expr, &Scope::new(outer.clone()))?;
                    let left = memory;
                    let key = ShareKey::Binding(left, expr.clone());
                    let op = self.shared_or(key, move |b| {
                        b.push_operator(Op::Binding { left, expr }, &[left])
                    });
                    outer.push(Arc::clone(&binding.declaration));
                    self.output(op)
                }
            };
        }
        self.terminal(rule, index, memory, outer)
    }

    fn alpha_memory(&mut self, pattern: &PatternElement, conditions: &[&Expr]) -> Result<NodeId> {
        let scope = Scope::default().with_subject(Arc::clone(&pattern.declaration));
        let mut parent = self.type_node(&pattern.fact_type);
        for condition in conditions {
            let compiled = CompiledExpr::new(condition, &scope)?;
            let key = ShareKey::Selection(parent, compiled.clone());
            parent = self.shared_or(key, move |b| b.push(Op::Selection(compiled), &[parent]));
        }
        Ok(self.shared_or(ShareKey::AlphaMemory(parent), move |b| {
            b.push(Op::AlphaMemory, &[parent])
        }))
    }

    fn pattern(
        &mut self,
        kind: BetaKind,
        left: NodeId,
        pattern: &PatternElement,
        outer: &[Arc<str>],
    ) -> Result<NodeId> {
        let (alpha, joins) = split(pattern);
        let right = self.alpha_memory(pattern, &alpha)?;
        let scope = Scope::new(outer.to_vec()).with_subject(Arc::clone(&pattern.declaration));
        let conditions = compile_all(joins, &scope)?;
        let key = ShareKey::Beta(kind, left, right, conditions.clone());
        let op = self.shared_or(key, move |b| {
            let input = BetaInput {
                left,
                right,
                conditions,
            };
            let op = match kind {
                BetaKind::Join => Op::Join(input),
                BetaKind::Not => Op::Not(input),
                BetaKind::Exists => Op::Exists(input),
            };
            b.push_operator(op, &[left, right])
        });
        Ok(self.output(op))
    }

    fn aggregate(
        &mut self,
        left: NodeId,
        pattern: &PatternElement,
        aggregate: &AggregateElement,
        outer: &[Arc<str>],
    ) -> Result<NodeId> {
        let roles: Vec<Arc<str>> = aggregate
            .expressions
            .iter()
            .map(|e| Arc::clone(&e.name))
            .collect();
        // Fails early on unknown aggregators and unsupported expression roles.
        self.aggregators.create(&aggregate.name, &roles)?;

        let source = &aggregate.source;
        let (alpha, joins) = split(source);
        let right = self.alpha_memory(source, &alpha)?;
        let source_scope =
            Scope::new(outer.to_vec()).with_subject(Arc::clone(&source.declaration));
        let conditions = compile_all(joins, &source_scope)?;
        let expressions = compile_all(aggregate.expressions.iter().map(|e| &e.expr), &source_scope)?;
        let result_scope =
            Scope::new(outer.to_vec()).with_subject(Arc::clone(&pattern.declaration));
        let result_conditions = compile_all(&pattern.conditions, &result_scope)?;

        let spec = AggregateSpec {
            name: Arc::clone(&aggregate.name),
            roles,
            expressions,
            result_type: pattern.fact_type.clone(),
            result_conditions,
        };
        let key = ShareKey::Aggregate(left, right, conditions.clone(), spec.clone());
        let op = self.shared_or(key, move |b| {
            let input = BetaInput {
                left,
                right,
                conditions,
            };
            b.push_operator(
                Op::Aggregate {
                    input,
                    spec: Arc::new(spec),
                },
                &[left, right],
            )
        });
        Ok(self.output(op))
    }

    fn terminal(
        &mut self,
        rule: &Arc<RuleDefinition>,
        branch: usize,
        memory: NodeId,
        declarations: Vec<Arc<str>>,
    ) -> Result<()> {
        let scope = Scope::new(declarations.clone());
        let priority = match &rule.priority {
            Priority::Static(p) => CompiledPriority::Static(*p),
            Priority::Dynamic(expr) => CompiledPriority::Dynamic(CompiledExpr::new(expr, &scope)?),
        };
        let filters = rule
            .filters
            .iter()
            .map(|filter| {
                Ok(match filter {
                    FilterElement::Predicate(expr) => {
                        CompiledFilter::Predicate(CompiledExpr::new(expr, &scope)?)
                    }
                    FilterElement::KeyChange(keys) => {
                        CompiledFilter::KeyChange(compile_all(keys, &scope)?)
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let index = self.terminals.len();
        let node = self.push(Op::Terminal(index), &[memory]);
        self.terminals.push(Terminal {
            node,
            rule: Arc::clone(rule),
            branch,
            declarations,
            priority,
            filters,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Finishing
    // -------------------------------------------------------------------------

    /// Records on every node the rules whose terminals it feeds.
    fn assign_rules(&mut self) {
        for index in 0..self.terminals.len() {
            let name = Arc::clone(&self.terminals[index].rule.name);
            let mut stack = vec![self.terminals[index].node];
            let mut seen = HashSet::new();
            while let Some(id) = stack.pop() {
                if !seen.insert(id) {
                    continue;
                }
                let node = &mut self.nodes[id.index()];
                if !node.rules.contains(&name) {
                    node.rules.push(Arc::clone(&name));
                }
                stack.extend(node.inputs.iter().copied());
            }
        }
    }

    fn collect_memories(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let node = &self.nodes[id.index()];
        match node.op {
            Op::AlphaMemory => out.push(id),
            Op::Type(_) | Op::Selection(_) => {
                for &successor in &node.successors {
                    self.collect_memories(successor, out);
                }
            }
            _ => {}
        }
    }
}
