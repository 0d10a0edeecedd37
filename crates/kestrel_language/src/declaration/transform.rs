//! Normalisation of rule left-hand sides.
//!
//! Before a rule reaches the network compiler its left-hand side is:
//! 1. simplified (single-child groups collapsed, nested groups of the same
//!    kind flattened),
//! 2. rewritten (`ForAll` becomes a negated pattern over the base fact),
//! 3. expanded into disjunctive normal form: a list of linear branches, each
//!    of which gets its own terminal node,
//! 4. validated (declaration names unique and every referenced name visible).

use std::collections::BTreeSet;
use std::sync::Arc;

use kestrel_foundation::{Error, Result};

use super::types::{
    BindingElement, FilterElement, GroupElement, GroupKind, PatternElement, Priority,
    RuleDefinition, RuleElement,
};
use crate::expr::Expr;

/// An element of a linear (Or-free) rule branch.
#[derive(Clone, Debug, PartialEq)]
pub enum BranchElement {
    /// Positive pattern, possibly over an aggregate.
    Pattern(PatternElement),
    /// Negated pattern.
    Not(PatternElement),
    /// Existential pattern.
    Exists(PatternElement),
    /// Computed value.
    Binding(BindingElement),
}

/// One alternative of a rule's left-hand side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleBranch {
    /// Elements in match order.
    pub elements: Vec<BranchElement>,
}

impl RuleBranch {
    /// Declarations in tuple-slot order.
    ///
    /// Patterns and bindings contribute a slot; `Not`/`Exists` do not.
    #[must_use]
    pub fn declarations(&self) -> Vec<Arc<str>> {
        self.elements
            .iter()
            .filter_map(|e| match e {
                BranchElement::Pattern(p) => Some(Arc::clone(&p.declaration)),
                BranchElement::Binding(b) => Some(Arc::clone(&b.declaration)),
                BranchElement::Not(_) | BranchElement::Exists(_) => None,
            })
            .collect()
    }
}

/// Collapses single-child groups and flattens nested groups of the same kind.
#[must_use]
pub fn simplify(element: RuleElement) -> RuleElement {
    match element {
        RuleElement::Group(group) => {
            let kind = group.kind;
            let mut children = Vec::with_capacity(group.children.len());
            for child in group.children {
                match simplify(child) {
                    RuleElement::Group(inner) if inner.kind == kind => {
                        children.extend(inner.children);
                    }
                    other => children.push(other),
                }
            }
            if children.len() == 1 {
                children.remove(0)
            } else {
                RuleElement::Group(GroupElement { kind, children })
            }
        }
        other => other,
    }
}

/// Rewrites `ForAll(base, patterns)` to `Not(base ∧ ¬(p1 ∧ … ∧ pn))` over the
/// single base fact.
///
/// # Errors
///
/// Returns `InvalidArgument` if a constraint pattern has a different type
/// than the base or is an aggregate.
pub fn rewrite_forall(base: &PatternElement, patterns: &[PatternElement]) -> Result<PatternElement> {
    if base.source.is_some() {
        return Err(Error::invalid_argument("ForAll base cannot be an aggregate"));
    }
    let mut constraint: Option<Expr> = None;
    for pattern in patterns {
        if pattern.fact_type != base.fact_type || pattern.source.is_some() {
            return Err(Error::invalid_argument(format!(
                "ForAll pattern {} must match the base type {}",
                pattern.declaration, base.fact_type
            )));
        }
        for condition in &pattern.conditions {
            let renamed = condition.rename(&pattern.declaration, &base.declaration);
            constraint = Some(match constraint {
                Some(acc) => acc.and(renamed),
                None => renamed,
            });
        }
    }
    let violation = constraint.map_or_else(|| Expr::lit(false), Expr::not);
    Ok(base.clone().with_condition(violation))
}

fn expand_element(element: &RuleElement) -> Result<Vec<Vec<BranchElement>>> {
    Ok(match element {
        RuleElement::Pattern(p) => vec![vec![BranchElement::Pattern(p.clone())]],
        RuleElement::Not(p) => vec![vec![BranchElement::Not(p.clone())]],
        RuleElement::Exists(p) => vec![vec![BranchElement::Exists(p.clone())]],
        RuleElement::Binding(b) => vec![vec![BranchElement::Binding(b.clone())]],
        RuleElement::ForAll { base, patterns } => {
            vec![vec![BranchElement::Not(rewrite_forall(base, patterns)?)]]
        }
        RuleElement::Group(group) => match group.kind {
            GroupKind::Or => {
                let mut out = Vec::new();
                for child in &group.children {
                    out.extend(expand_element(child)?);
                }
                out
            }
            GroupKind::And => {
                let mut out: Vec<Vec<BranchElement>> = vec![Vec::new()];
                for child in &group.children {
                    let alternatives = expand_element(child)?;
                    let mut next = Vec::with_capacity(out.len() * alternatives.len());
                    for prefix in &out {
                        for alt in &alternatives {
                            let mut branch = prefix.clone();
                            branch.extend(alt.iter().cloned());
                            next.push(branch);
                        }
                    }
                    out = next;
                }
                out
            }
        },
    })
}

/// Simplifies, rewrites, and expands a rule into validated linear branches.
///
/// # Errors
///
/// Returns `InvalidArgument` for an empty rule name, duplicate declarations,
/// references to undeclared names, nested aggregates, and aggregates under
/// `Not`/`Exists`.
pub fn expand(rule: &RuleDefinition) -> Result<Vec<RuleBranch>> {
    if rule.name.trim().is_empty() {
        return Err(Error::invalid_argument("rule name must not be empty"));
    }
    let lhs = simplify(RuleElement::Group(rule.lhs.clone()));
    let branches: Vec<RuleBranch> = expand_element(&lhs)?
        .into_iter()
        .map(|elements| RuleBranch { elements })
        .collect();
    for branch in &branches {
        validate_branch(rule, branch)
            .map_err(|e| Error::invalid_argument(format!("rule {}: {}", rule.name, e.kind)))?;
    }
    Ok(branches)
}

fn check_names(expr: &Expr, visible: &BTreeSet<Arc<str>>) -> Result<()> {
    match expr.free_vars().into_iter().find(|v| !visible.contains(v)) {
        Some(name) => Err(Error::undefined_variable(&*name)),
        None => Ok(()),
    }
}

fn with_name(visible: &BTreeSet<Arc<str>>, name: &Arc<str>) -> BTreeSet<Arc<str>> {
    let mut scope = visible.clone();
    scope.insert(Arc::clone(name));
    scope
}

fn declare(visible: &mut BTreeSet<Arc<str>>, name: &Arc<str>) -> Result<()> {
    if visible.insert(Arc::clone(name)) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!("duplicate declaration {name}")))
    }
}

fn check_pattern(pattern: &PatternElement, visible: &BTreeSet<Arc<str>>) -> Result<()> {
    if visible.contains(&pattern.declaration) {
        return Err(Error::invalid_argument(format!(
            "duplicate declaration {}",
            pattern.declaration
        )));
    }
    let own = with_name(visible, &pattern.declaration);
    for condition in &pattern.conditions {
        check_names(condition, &own)?;
    }
    if let Some(aggregate) = &pattern.source {
        let source = &aggregate.source;
        if source.source.is_some() {
            return Err(Error::invalid_argument("nested aggregates are not supported"));
        }
        check_pattern(source, visible)?;
        let inner = with_name(visible, &source.declaration);
        for named in &aggregate.expressions {
            check_names(&named.expr, &inner)?;
        }
    }
    Ok(())
}

fn validate_branch(rule: &RuleDefinition, branch: &RuleBranch) -> Result<()> {
    let mut visible = BTreeSet::new();
    for element in &branch.elements {
        match element {
            BranchElement::Pattern(p) => {
                check_pattern(p, &visible)?;
                declare(&mut visible, &p.declaration)?;
            }
            BranchElement::Not(p) | BranchElement::Exists(p) => {
                if p.source.is_some() {
                    return Err(Error::invalid_argument(
                        "Not/Exists over an aggregate is not supported",
                    ));
                }
                check_pattern(p, &visible)?;
            }
            BranchElement::Binding(b) => {
                check_names(&b.expr, &visible)?;
                declare(&mut visible, &b.declaration)?;
            }
        }
    }
    if let Priority::Dynamic(expr) = &rule.priority {
        check_names(expr, &visible)?;
    }
    for filter in &rule.filters {
        match filter {
            FilterElement::Predicate(expr) => check_names(expr, &visible)?,
            FilterElement::KeyChange(keys) => {
                for key in keys {
                    check_names(key, &visible)?;
                }
            }
        }
    }
    Ok(())
}
