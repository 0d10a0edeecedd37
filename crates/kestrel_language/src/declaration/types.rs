//! Rule definition types.

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use kestrel_foundation::Result;
use kestrel_storage::FactType;

use super::context::RuleContext;
use crate::expr::Expr;

// =============================================================================
// Patterns and Aggregates
// =============================================================================

/// A pattern matching single facts of a type.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternElement {
    /// Name the matched fact is visible under.
    pub declaration: Arc<str>,
    /// Fact type to match (subtypes match too).
    pub fact_type: FactType,
    /// Conditions the fact must satisfy.
    pub conditions: Vec<Expr>,
    /// When set, the pattern matches aggregate results instead of facts.
    pub source: Option<Box<AggregateElement>>,
}

impl PatternElement {
    /// Creates a pattern with no conditions.
    #[must_use]
    pub fn new(declaration: impl Into<Arc<str>>, fact_type: impl Into<FactType>) -> Self {
        Self {
            declaration: declaration.into(),
            fact_type: fact_type.into(),
            conditions: Vec::new(),
            source: None,
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Expr) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Makes the pattern match the results of an aggregation.
    #[must_use]
    pub fn from_aggregate(mut self, aggregate: AggregateElement) -> Self {
        self.source = Some(Box::new(aggregate));
        self
    }
}

/// An expression with a role name, used as an aggregator input.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedExpr {
    /// Role of the expression (for example `key` or `element`).
    pub name: Arc<str>,
    /// The expression.
    pub expr: Expr,
}

/// Aggregation of the facts matched by a source pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateElement {
    /// Registered aggregator name.
    pub name: Arc<str>,
    /// Aggregator inputs, in order.
    pub expressions: Vec<NamedExpr>,
    /// Pattern whose matches are aggregated.
    pub source: PatternElement,
}

impl AggregateElement {
    /// Creates an aggregate with no expressions.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, source: PatternElement) -> Self {
        Self {
            name: name.into(),
            expressions: Vec::new(),
            source,
        }
    }

    /// Adds a named expression.
    #[must_use]
    pub fn with_expression(mut self, name: impl Into<Arc<str>>, expr: Expr) -> Self {
        self.expressions.push(NamedExpr {
            name: name.into(),
            expr,
        });
        self
    }

    /// Collects matching facts into a vector.
    #[must_use]
    pub fn collect(source: PatternElement) -> Self {
        Self::new("Collect", source)
    }

    /// Groups matching facts by key.
    #[must_use]
    pub fn group_by(source: PatternElement, key: Expr) -> Self {
        Self::new("GroupBy", source).with_expression("key", key)
    }

    /// Builds a single lookup map from key to matching facts.
    #[must_use]
    pub fn to_lookup(source: PatternElement, key: Expr) -> Self {
        Self::new("ToLookup", source).with_expression("key", key)
    }

    /// Sorts matching facts; follow with [`then_by`](Self::then_by) for more keys.
    #[must_use]
    pub fn order_by(source: PatternElement, key: Expr, direction: SortDirection) -> Self {
        Self::new("Sort", source).then_by(key, direction)
    }

    /// Adds a secondary sort key.
    #[must_use]
    pub fn then_by(self, key: Expr, direction: SortDirection) -> Self {
        let role = match direction {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        };
        self.with_expression(role, key)
    }

    /// Projects every matching fact.
    #[must_use]
    pub fn project(source: PatternElement, selector: Expr) -> Self {
        Self::new("Project", source).with_expression("selector", selector)
    }

    /// Flattens a collection produced for every matching fact.
    #[must_use]
    pub fn flatten(source: PatternElement, selector: Expr) -> Self {
        Self::new("Flatten", source).with_expression("selector", selector)
    }

    /// Keeps only facts satisfying a predicate.
    #[must_use]
    pub fn filter(source: PatternElement, predicate: Expr) -> Self {
        Self::new("Filter", source).with_expression("predicate", predicate)
    }

    /// Selects the earliest matching fact.
    #[must_use]
    pub fn first(source: PatternElement) -> Self {
        Self::new("First", source)
    }
}

/// Direction of a sort key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

// =============================================================================
// Left-hand side
// =============================================================================

/// A computed value added to the match under a declaration name.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingElement {
    /// Name the value is visible under.
    pub declaration: Arc<str>,
    /// Expression over earlier declarations.
    pub expr: Expr,
}

impl BindingElement {
    /// Creates a binding.
    #[must_use]
    pub fn new(declaration: impl Into<Arc<str>>, expr: Expr) -> Self {
        Self {
            declaration: declaration.into(),
            expr,
        }
    }
}

/// Kind of a group element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GroupKind {
    /// All children must match.
    And,
    /// Any child may match; each alternative activates separately.
    Or,
}

/// A group of rule elements.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupElement {
    /// Group kind.
    pub kind: GroupKind,
    /// Child elements in order.
    pub children: Vec<RuleElement>,
}

impl GroupElement {
    /// Creates an empty `And` group.
    #[must_use]
    pub fn and() -> Self {
        Self {
            kind: GroupKind::And,
            children: Vec::new(),
        }
    }

    /// Creates an empty `Or` group.
    #[must_use]
    pub fn or() -> Self {
        Self {
            kind: GroupKind::Or,
            children: Vec::new(),
        }
    }

    /// Adds a child.
    #[must_use]
    pub fn with(mut self, child: impl Into<RuleElement>) -> Self {
        self.children.push(child.into());
        self
    }
}

impl Default for GroupElement {
    fn default() -> Self {
        Self::and()
    }
}

/// An element of a rule's left-hand side.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleElement {
    /// Match a fact (or an aggregate result).
    Pattern(PatternElement),
    /// Nested group.
    Group(GroupElement),
    /// No fact matches the pattern.
    Not(PatternElement),
    /// At least one fact matches the pattern.
    Exists(PatternElement),
    /// Every fact matching `base` also satisfies all `patterns`.
    ///
    /// The patterns constrain the base fact itself and must have its type.
    ForAll {
        /// Facts to quantify over.
        base: PatternElement,
        /// Constraints every base fact must meet.
        patterns: Vec<PatternElement>,
    },
    /// Computed value.
    Binding(BindingElement),
}

impl From<PatternElement> for RuleElement {
    fn from(p: PatternElement) -> Self {
        Self::Pattern(p)
    }
}

impl From<GroupElement> for RuleElement {
    fn from(g: GroupElement) -> Self {
        Self::Group(g)
    }
}

impl From<BindingElement> for RuleElement {
    fn from(b: BindingElement) -> Self {
        Self::Binding(b)
    }
}

// =============================================================================
// Agenda-time elements
// =============================================================================

/// Agenda filter attached to a rule.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterElement {
    /// Activation is suppressed when the predicate is false.
    Predicate(Expr),
    /// Re-activation is suppressed unless one of the values changed.
    KeyChange(Vec<Expr>),
}

/// Rule priority.
#[derive(Clone, Debug, PartialEq)]
pub enum Priority {
    /// Fixed priority.
    Static(i32),
    /// Priority computed from the match whenever the activation is queued.
    Dynamic(Expr),
}

impl Default for Priority {
    fn default() -> Self {
        Self::Static(0)
    }
}

/// Whether a rule may fire again for an updated match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Repeatability {
    /// Fires on every accepted re-activation.
    #[default]
    Repeatable,
    /// Fires once per match identity.
    NonRepeatable,
}

// =============================================================================
// Actions
// =============================================================================

/// Set of activation transitions an action runs on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionTrigger(u8);

impl ActionTrigger {
    /// Runs on no transition.
    pub const NONE: Self = Self(0);
    /// Runs when a match first becomes active.
    pub const ACTIVATED: Self = Self(1);
    /// Runs when a fired match is updated.
    pub const REACTIVATED: Self = Self(2);
    /// Runs when a fired match goes away.
    pub const DEACTIVATED: Self = Self(4);

    /// Returns true if every transition in `other` is in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if the sets overlap.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for ActionTrigger {
    fn default() -> Self {
        Self::ACTIVATED.union(Self::REACTIVATED)
    }
}

impl BitOr for ActionTrigger {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for ActionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::ACTIVATED) {
            names.push("Activated");
        }
        if self.contains(Self::REACTIVATED) {
            names.push("Reactivated");
        }
        if self.contains(Self::DEACTIVATED) {
            names.push("Deactivated");
        }
        write!(f, "ActionTrigger({})", names.join("|"))
    }
}

/// Host closure executed when a rule fires.
pub type ActionFn = Arc<dyn Fn(&mut dyn RuleContext) -> Result<()> + Send + Sync>;

/// An action of a rule.
#[derive(Clone)]
pub struct ActionElement {
    /// The closure.
    pub action: ActionFn,
    /// Transitions it runs on.
    pub trigger: ActionTrigger,
}

impl ActionElement {
    /// Creates an action running on activation and re-activation.
    pub fn new(action: impl Fn(&mut dyn RuleContext) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            action: Arc::new(action),
            trigger: ActionTrigger::default(),
        }
    }

    /// Sets the transitions the action runs on.
    #[must_use]
    pub fn on(mut self, trigger: ActionTrigger) -> Self {
        self.trigger = trigger;
        self
    }
}

impl fmt::Debug for ActionElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionElement")
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Rule Definition
// =============================================================================

/// A complete rule.
///
/// Built with the `with_*`/`when`/`then` builders and handed to the rule
/// repository. Immutable once compiled.
#[derive(Clone, Debug)]
pub struct RuleDefinition {
    /// Unique rule name.
    pub name: Arc<str>,
    /// Free-form description.
    pub description: String,
    /// Tags for filtering and diagnostics.
    pub tags: Vec<String>,
    /// Conflict-resolution priority.
    pub priority: Priority,
    /// Repeatability.
    pub repeatability: Repeatability,
    /// Left-hand side.
    pub lhs: GroupElement,
    /// Agenda filters.
    pub filters: Vec<FilterElement>,
    /// Right-hand side.
    pub actions: Vec<ActionElement>,
}

impl RuleDefinition {
    /// Creates an empty rule.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            priority: Priority::default(),
            repeatability: Repeatability::default(),
            lhs: GroupElement::and(),
            filters: Vec::new(),
            actions: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Sets a static priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Priority::Static(priority);
        self
    }

    /// Sets a priority computed from the match.
    #[must_use]
    pub fn with_dynamic_priority(mut self, expr: Expr) -> Self {
        self.priority = Priority::Dynamic(expr);
        self
    }

    /// Sets the repeatability.
    #[must_use]
    pub fn with_repeatability(mut self, repeatability: Repeatability) -> Self {
        self.repeatability = repeatability;
        self
    }

    /// Replaces the left-hand side.
    #[must_use]
    pub fn with_lhs(mut self, lhs: GroupElement) -> Self {
        self.lhs = lhs;
        self
    }

    /// Appends an element to the top-level `And` group.
    #[must_use]
    pub fn when(mut self, element: impl Into<RuleElement>) -> Self {
        self.lhs.children.push(element.into());
        self
    }

    /// Adds an agenda filter.
    #[must_use]
    pub fn with_filter(mut self, filter: FilterElement) -> Self {
        self.filters.push(filter);
        self
    }

    /// Adds an action running on activation and re-activation.
    #[must_use]
    pub fn then(
        self,
        action: impl Fn(&mut dyn RuleContext) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.with_action(ActionElement::new(action))
    }

    /// Adds an action.
    #[must_use]
    pub fn with_action(mut self, action: ActionElement) -> Self {
        self.actions.push(action);
        self
    }
}
