//! Session lifecycle events.
//!
//! Handlers subscribed to a session see every event synchronously, in
//! registration order. Failure events carry a `handled` flag: a handler that
//! sets it turns the failure into a non-match (left-hand side), a rejecting
//! filter (agenda), or a consumed activation (actions).

use std::fmt;
use std::sync::Arc;

use kestrel_foundation::{Error, Value};
use kestrel_language::ActionTrigger;
use kestrel_storage::{Fact, FactType};

/// Callback invoked for every event.
pub type EventHandler = Box<dyn FnMut(&mut EngineEvent) + Send>;

/// An activation transition.
#[derive(Clone, Debug)]
pub struct ActivationEvent {
    /// Rule of the activation.
    pub rule: Arc<str>,
    /// Facts of the match, in tuple order.
    pub facts: Vec<Arc<Fact>>,
}

/// A rule firing.
#[derive(Clone, Debug)]
pub struct FiringEvent {
    /// Rule being fired.
    pub rule: Arc<str>,
    /// Transition that caused the firing.
    pub trigger: ActionTrigger,
    /// Facts of the match.
    pub facts: Vec<Arc<Fact>>,
}

/// A successful expression evaluation.
#[derive(Clone, Debug)]
pub struct ExpressionEvaluation {
    /// Rule the expression belongs to, when known.
    pub rule: Option<Arc<str>>,
    /// Source text of the expression.
    pub expression: Arc<str>,
    /// Facts the expression was evaluated against.
    pub facts: Vec<Arc<Fact>>,
    /// Result of the evaluation.
    pub result: Value,
}

/// A failed expression evaluation.
#[derive(Debug)]
pub struct ExpressionFailure {
    /// Rule the expression belongs to, when known.
    pub rule: Option<Arc<str>>,
    /// Source text of the expression.
    pub expression: Arc<str>,
    /// Facts the expression was evaluated against.
    pub facts: Vec<Arc<Fact>>,
    /// The failure.
    pub error: Error,
    /// Set by a handler to recover from the failure.
    pub handled: bool,
}

/// Everything a session reports to its subscribers.
#[derive(Debug)]
pub enum EngineEvent {
    /// A fact is about to be inserted.
    FactInserting {
        /// Type of the new fact.
        fact_type: FactType,
        /// Value of the new fact.
        value: Value,
    },
    /// A fact was inserted and propagated.
    FactInserted {
        /// The new fact.
        fact: Arc<Fact>,
    },
    /// A fact is about to be updated.
    FactUpdating {
        /// The fact before the update.
        fact: Arc<Fact>,
        /// The incoming value.
        value: Value,
    },
    /// A fact was updated and propagated.
    FactUpdated {
        /// The fact before the update.
        previous: Arc<Fact>,
        /// The fact after the update.
        fact: Arc<Fact>,
    },
    /// A fact is about to be retracted.
    FactRetracting {
        /// The fact.
        fact: Arc<Fact>,
    },
    /// A fact was retracted and propagated.
    FactRetracted {
        /// The fact.
        fact: Arc<Fact>,
    },
    /// A match appeared on the agenda.
    ActivationCreated(ActivationEvent),
    /// A match on the agenda changed.
    ActivationUpdated(ActivationEvent),
    /// A match left the agenda.
    ActivationDeleted(ActivationEvent),
    /// A rule is about to run its actions.
    RuleFiring(FiringEvent),
    /// A rule ran its actions.
    RuleFired(FiringEvent),
    /// A condition, binding, or aggregate expression was evaluated.
    LhsExpressionEvaluated(ExpressionEvaluation),
    /// A condition, binding, or aggregate expression failed.
    LhsExpressionFailed(ExpressionFailure),
    /// A filter or priority expression was evaluated.
    AgendaExpressionEvaluated(ExpressionEvaluation),
    /// A filter or priority expression failed.
    AgendaExpressionFailed(ExpressionFailure),
    /// An action completed.
    RhsExpressionEvaluated(ExpressionEvaluation),
    /// An action failed.
    RhsExpressionFailed(ExpressionFailure),
    /// Firing stopped because an action requested a halt.
    FireHalted {
        /// Firings performed by the halted `fire` call.
        firings: usize,
    },
}

impl EngineEvent {
    /// Stable name of the event variant.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FactInserting { .. } => "FactInserting",
            Self::FactInserted { .. } => "FactInserted",
            Self::FactUpdating { .. } => "FactUpdating",
            Self::FactUpdated { .. } => "FactUpdated",
            Self::FactRetracting { .. } => "FactRetracting",
            Self::FactRetracted { .. } => "FactRetracted",
            Self::ActivationCreated(_) => "ActivationCreated",
            Self::ActivationUpdated(_) => "ActivationUpdated",
            Self::ActivationDeleted(_) => "ActivationDeleted",
            Self::RuleFiring(_) => "RuleFiring",
            Self::RuleFired(_) => "RuleFired",
            Self::LhsExpressionEvaluated(_) => "LhsExpressionEvaluated",
            Self::LhsExpressionFailed(_) => "LhsExpressionFailed",
            Self::AgendaExpressionEvaluated(_) => "AgendaExpressionEvaluated",
            Self::AgendaExpressionFailed(_) => "AgendaExpressionFailed",
            Self::RhsExpressionEvaluated(_) => "RhsExpressionEvaluated",
            Self::RhsExpressionFailed(_) => "RhsExpressionFailed",
            Self::FireHalted { .. } => "FireHalted",
        }
    }

    /// Rule the event concerns, if any.
    #[must_use]
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::ActivationCreated(a) | Self::ActivationUpdated(a) | Self::ActivationDeleted(a) => {
                Some(&a.rule)
            }
            Self::RuleFiring(f) | Self::RuleFired(f) => Some(&f.rule),
            Self::LhsExpressionEvaluated(e)
            | Self::AgendaExpressionEvaluated(e)
            | Self::RhsExpressionEvaluated(e) => e.rule.as_deref(),
            Self::LhsExpressionFailed(e)
            | Self::AgendaExpressionFailed(e)
            | Self::RhsExpressionFailed(e) => e.rule.as_deref(),
            _ => None,
        }
    }

    /// Facts the event concerns.
    #[must_use]
    pub fn facts(&self) -> Vec<Arc<Fact>> {
        match self {
            Self::FactInserting { .. } | Self::FireHalted { .. } => Vec::new(),
            Self::FactInserted { fact }
            | Self::FactUpdating { fact, .. }
            | Self::FactUpdated { fact, .. }
            | Self::FactRetracting { fact }
            | Self::FactRetracted { fact } => vec![Arc::clone(fact)],
            Self::ActivationCreated(a) | Self::ActivationUpdated(a) | Self::ActivationDeleted(a) => {
                a.facts.clone()
            }
            Self::RuleFiring(f) | Self::RuleFired(f) => f.facts.clone(),
            Self::LhsExpressionEvaluated(e)
            | Self::AgendaExpressionEvaluated(e)
            | Self::RhsExpressionEvaluated(e) => e.facts.clone(),
            Self::LhsExpressionFailed(e)
            | Self::AgendaExpressionFailed(e)
            | Self::RhsExpressionFailed(e) => e.facts.clone(),
        }
    }

    /// Returns true for activation transitions, the events deferred during bulk operations.
    #[must_use]
    pub fn is_agenda_event(&self) -> bool {
        matches!(
            self,
            Self::ActivationCreated(_) | Self::ActivationUpdated(_) | Self::ActivationDeleted(_)
        )
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            Self::FactInserting { fact_type, value } => write!(f, " {fact_type} {value}"),
            Self::FactUpdating { fact, value } => write!(f, " {fact} -> {value}"),
            Self::FireHalted { firings } => write!(f, " after {firings} firings"),
            Self::LhsExpressionFailed(e)
            | Self::AgendaExpressionFailed(e)
            | Self::RhsExpressionFailed(e) => write!(f, " {}: {}", e.expression, e.error),
            other => {
                if let Some(rule) = other.rule() {
                    write!(f, " {rule}")?;
                }
                for fact in other.facts() {
                    write!(f, " {fact}")?;
                }
                Ok(())
            }
        }
    }
}
