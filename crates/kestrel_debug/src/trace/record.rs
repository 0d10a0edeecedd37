//! Trace event and record types.
//!
//! A [`TraceEvent`] is an owned snapshot of an [`EngineEvent`]: facts are
//! reduced to their ids and values so records stay valid after the session
//! moves on.

use std::fmt;
use std::sync::Arc;

use kestrel_engine::{EngineEvent, ExpressionEvaluation, ExpressionFailure};
use kestrel_foundation::{FactId, Value};
use kestrel_language::ActionTrigger;
use kestrel_storage::{Fact, FactType};

// =============================================================================
// Event Parts
// =============================================================================

/// Kind of working-memory change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactChange {
    /// A fact was added.
    Insert,
    /// A fact's value changed.
    Update,
    /// A fact was removed.
    Retract,
}

impl fmt::Display for FactChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Retract => write!(f, "retract"),
        }
    }
}

/// Kind of agenda change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationChange {
    /// A match appeared.
    Created,
    /// A match changed.
    Updated,
    /// A match went away.
    Deleted,
}

impl fmt::Display for ActivationChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Where an expression was evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationStage {
    /// Conditions, bindings, and aggregate expressions.
    Lhs,
    /// Filters and priorities.
    Agenda,
    /// Actions.
    Rhs,
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lhs => write!(f, "lhs"),
            Self::Agenda => write!(f, "agenda"),
            Self::Rhs => write!(f, "rhs"),
        }
    }
}

/// Short name of the transition a firing ran for.
#[must_use]
pub fn trigger_name(trigger: ActionTrigger) -> &'static str {
    if trigger == ActionTrigger::DEACTIVATED {
        "deactivated"
    } else if trigger == ActionTrigger::REACTIVATED {
        "reactivated"
    } else {
        "activated"
    }
}

// =============================================================================
// Trace Event
// =============================================================================

/// A traced session event.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    /// A fact is about to change (`pending`) or has changed.
    Fact {
        /// Kind of change.
        change: FactChange,
        /// True for the event sent before propagation.
        pending: bool,
        /// Type of the fact.
        fact_type: FactType,
        /// Id of the fact; unknown before an insert.
        fact: Option<FactId>,
        /// Value after the change (or the retracted value).
        value: Value,
        /// Value before an update.
        previous: Option<Value>,
    },
    /// The agenda changed.
    Activation {
        /// Kind of change.
        change: ActivationChange,
        /// Rule of the activation.
        rule: Arc<str>,
        /// Facts of the match.
        facts: Vec<FactId>,
    },
    /// A rule is about to run its actions.
    RuleFiring {
        /// The rule.
        rule: Arc<str>,
        /// Transition being fired.
        trigger: ActionTrigger,
        /// Facts of the match.
        facts: Vec<FactId>,
    },
    /// A rule ran its actions.
    RuleFired {
        /// The rule.
        rule: Arc<str>,
        /// Transition that was fired.
        trigger: ActionTrigger,
    },
    /// An expression was evaluated.
    Evaluated {
        /// Where it ran.
        stage: EvaluationStage,
        /// Owning rule, when known.
        rule: Option<Arc<str>>,
        /// Source text.
        expression: Arc<str>,
        /// Result.
        result: Value,
    },
    /// An expression failed.
    Failed {
        /// Where it ran.
        stage: EvaluationStage,
        /// Owning rule, when known.
        rule: Option<Arc<str>>,
        /// Source text.
        expression: Arc<str>,
        /// Rendered error.
        error: String,
        /// Whether an earlier handler had already handled it.
        handled: bool,
    },
    /// Firing stopped on request.
    Halted {
        /// Firings performed before the halt.
        firings: usize,
    },
}

fn fact_ids(facts: &[Arc<Fact>]) -> Vec<FactId> {
    facts.iter().map(|f| f.id).collect()
}

fn written(change: FactChange, pending: bool, fact: &Fact, previous: Option<Value>) -> TraceEvent {
    TraceEvent::Fact {
        change,
        pending,
        fact_type: fact.fact_type.clone(),
        fact: Some(fact.id),
        value: fact.value.clone(),
        previous,
    }
}

fn evaluated(stage: EvaluationStage, e: &ExpressionEvaluation) -> TraceEvent {
    TraceEvent::Evaluated {
        stage,
        rule: e.rule.clone(),
        expression: Arc::clone(&e.expression),
        result: e.result.clone(),
    }
}

fn failed(stage: EvaluationStage, e: &ExpressionFailure) -> TraceEvent {
    TraceEvent::Failed {
        stage,
        rule: e.rule.clone(),
        expression: Arc::clone(&e.expression),
        error: e.error.to_string(),
        handled: e.handled,
    }
}

impl From<&EngineEvent> for TraceEvent {
    fn from(event: &EngineEvent) -> Self {
        use ActivationChange as A;
        use EvaluationStage as S;
        use FactChange as C;

        match event {
            EngineEvent::FactInserting { fact_type, value } => Self::Fact {
                change: C::Insert,
                pending: true,
                fact_type: fact_type.clone(),
                fact: None,
                value: value.clone(),
                previous: None,
            },
            EngineEvent::FactInserted { fact } => written(C::Insert, false, fact, None),
            EngineEvent::FactUpdating { fact, value } => Self::Fact {
                change: C::Update,
                pending: true,
                fact_type: fact.fact_type.clone(),
                fact: Some(fact.id),
                value: value.clone(),
                previous: Some(fact.value.clone()),
            },
            EngineEvent::FactUpdated { previous, fact } => {
                written(C::Update, false, fact, Some(previous.value.clone()))
            }
            EngineEvent::FactRetracting { fact } => written(C::Retract, true, fact, None),
            EngineEvent::FactRetracted { fact } => written(C::Retract, false, fact, None),
            EngineEvent::ActivationCreated(a) => Self::Activation {
                change: A::Created,
                rule: Arc::clone(&a.rule),
                facts: fact_ids(&a.facts),
            },
            EngineEvent::ActivationUpdated(a) => Self::Activation {
                change: A::Updated,
                rule: Arc::clone(&a.rule),
                facts: fact_ids(&a.facts),
            },
            EngineEvent::ActivationDeleted(a) => Self::Activation {
                change: A::Deleted,
                rule: Arc::clone(&a.rule),
                facts: fact_ids(&a.facts),
            },
            EngineEvent::RuleFiring(f) => Self::RuleFiring {
                rule: Arc::clone(&f.rule),
                trigger: f.trigger,
                facts: fact_ids(&f.facts),
            },
            EngineEvent::RuleFired(f) => Self::RuleFired {
                rule: Arc::clone(&f.rule),
                trigger: f.trigger,
            },
            EngineEvent::LhsExpressionEvaluated(e) => evaluated(S::Lhs, e),
            EngineEvent::AgendaExpressionEvaluated(e) => evaluated(S::Agenda, e),
            EngineEvent::RhsExpressionEvaluated(e) => evaluated(S::Rhs, e),
            EngineEvent::LhsExpressionFailed(e) => failed(S::Lhs, e),
            EngineEvent::AgendaExpressionFailed(e) => failed(S::Agenda, e),
            EngineEvent::RhsExpressionFailed(e) => failed(S::Rhs, e),
            EngineEvent::FireHalted { firings } => Self::Halted { firings: *firings },
        }
    }
}

impl TraceEvent {
    /// Name of the event, matching [`EngineEvent::name`].
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Fact { change, pending, .. } => match (change, pending) {
                (FactChange::Insert, true) => "FactInserting",
                (FactChange::Insert, false) => "FactInserted",
                (FactChange::Update, true) => "FactUpdating",
                (FactChange::Update, false) => "FactUpdated",
                (FactChange::Retract, true) => "FactRetracting",
                (FactChange::Retract, false) => "FactRetracted",
            },
            Self::Activation { change, .. } => match change {
                ActivationChange::Created => "ActivationCreated",
                ActivationChange::Updated => "ActivationUpdated",
                ActivationChange::Deleted => "ActivationDeleted",
            },
            Self::RuleFiring { .. } => "RuleFiring",
            Self::RuleFired { .. } => "RuleFired",
            Self::Evaluated { stage, .. } => match stage {
                EvaluationStage::Lhs => "LhsExpressionEvaluated",
                EvaluationStage::Agenda => "AgendaExpressionEvaluated",
                EvaluationStage::Rhs => "RhsExpressionEvaluated",
            },
            Self::Failed { stage, .. } => match stage {
                EvaluationStage::Lhs => "LhsExpressionFailed",
                EvaluationStage::Agenda => "AgendaExpressionFailed",
                EvaluationStage::Rhs => "RhsExpressionFailed",
            },
            Self::Halted { .. } => "FireHalted",
        }
    }

    /// Rule the event concerns, if any.
    #[must_use]
    pub fn rule(&self) -> Option<&str> {
        match self {
            Self::Activation { rule, .. }
            | Self::RuleFiring { rule, .. }
            | Self::RuleFired { rule, .. } => Some(rule),
            Self::Evaluated { rule, .. } | Self::Failed { rule, .. } => rule.as_deref(),
            Self::Fact { .. } | Self::Halted { .. } => None,
        }
    }

    /// Returns true for working-memory changes.
    #[must_use]
    pub fn is_fact_event(&self) -> bool {
        matches!(self, Self::Fact { .. })
    }

    /// Returns true for expression failures.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

// =============================================================================
// Trace Record
// =============================================================================

/// A recorded event with its position in the trace.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    /// Monotonic record id.
    pub id: u64,
    /// Number of firings started before this event.
    pub cycle: u64,
    /// Nanoseconds since the tracer was created.
    pub timestamp_ns: u64,
    /// The event.
    pub event: TraceEvent,
}

impl TraceRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(id: u64, cycle: u64, timestamp_ns: u64, event: TraceEvent) -> Self {
        Self {
            id,
            cycle,
            timestamp_ns,
            event,
        }
    }

    /// Name of the recorded event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Serializes to the same object [`JsonFormatter`](super::JsonFormatter) prints.
#[cfg(feature = "serde")]
impl serde::Serialize for TraceRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde::Serialize::serialize(&super::JsonFormatter::record(self), serializer)
    }
}
