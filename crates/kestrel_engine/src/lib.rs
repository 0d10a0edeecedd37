//! RETE network, incremental aggregation, agenda, and sessions for Kestrel.
//!
//! This crate provides:
//! - [`RuleRepository`] - Collects rules and compiles them into a shared network
//! - [`SessionFactory`] - Creates independent sessions over one network
//! - [`Session`] - Working memory, propagation, and the firing loop
//! - [`Agenda`] - Activation records and conflict resolution
//! - [`Aggregator`] - Incremental aggregation plugins and the built-ins
//! - [`EngineEvent`] - Lifecycle events delivered to subscribers

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agenda;
pub mod aggregate;
pub mod config;
pub mod events;
pub mod linked;
pub mod network;
pub mod repository;
pub mod session;

pub use agenda::{Activation, ActivationKey, ActivationState, Agenda};
pub use aggregate::{
    AggregateInput, AggregationAction, AggregationResult, Aggregator, AggregatorFactory,
    AggregatorRegistry,
};
pub use config::{CompilerOptions, SessionConfig};
pub use events::{
    ActivationEvent, EngineEvent, EventHandler, ExpressionEvaluation, ExpressionFailure,
    FiringEvent,
};
pub use linked::{LinkedAction, LinkedBatch};
pub use network::{Network, NetworkSchema, NodeId, NodeKind, SchemaNode};
pub use repository::{RuleRepository, SessionFactory};
pub use session::{AgendaFilter, Session};
