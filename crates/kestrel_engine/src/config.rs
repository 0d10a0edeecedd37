//! Configuration for network compilation and sessions.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options for compiling rules into a network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompilerOptions {
    /// Reuse structurally equal nodes across rules and branches.
    pub share_nodes: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self { share_nodes: true }
    }
}

impl CompilerOptions {
    /// Builder method to enable or disable node sharing.
    #[must_use]
    pub fn with_share_nodes(mut self, share_nodes: bool) -> Self {
        self.share_nodes = share_nodes;
        self
    }
}

/// Configuration for a session.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    /// Maximum firings per `fire` call before `LimitExceeded` (None = unbounded).
    pub max_firings: Option<usize>,

    /// Hold activation events until a bulk operation completes.
    pub defer_bulk_agenda_events: bool,

    /// Emit `*ExpressionEvaluated` events for successful evaluations.
    pub emit_evaluation_events: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_firings: Some(10_000),
            defer_bulk_agenda_events: true,
            emit_evaluation_events: false,
        }
    }
}

impl SessionConfig {
    /// Configuration with no firing limit.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            max_firings: None,
            ..Self::default()
        }
    }

    /// Builder method to set the firing limit.
    #[must_use]
    pub fn with_max_firings(mut self, limit: usize) -> Self {
        self.max_firings = Some(limit);
        self
    }

    /// Builder method to control deferral of bulk agenda events.
    #[must_use]
    pub fn with_defer_bulk_agenda_events(mut self, defer: bool) -> Self {
        self.defer_bulk_agenda_events = defer;
        self
    }

    /// Builder method to control evaluation events.
    #[must_use]
    pub fn with_evaluation_events(mut self, emit: bool) -> Self {
        self.emit_evaluation_events = emit;
        self
    }
}
