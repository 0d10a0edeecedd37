//! Kestrel - Forward-chaining production rule engine
//!
//! This crate re-exports all layers of the Kestrel system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 4: kestrel_debug       - Event tracing, network rendering, log setup
//! Layer 3: kestrel_engine      - RETE network, aggregation, agenda, sessions
//! Layer 2: kestrel_language    - Expressions, binder, closure compiler, rules
//! Layer 1: kestrel_storage     - Fact store, fact schemas, type registry
//! Layer 0: kestrel_foundation  - Core types (Value, FactId, Error)
//! ```
//!
//! # Example
//!
//! ```
//! use kestrel::prelude::*;
//!
//! let mut repository = RuleRepository::new();
//! repository
//!     .add_rule(
//!         RuleDefinition::new("Greet")
//!             .when(PatternElement::new("c", "Customer"))
//!             .then(|ctx| {
//!                 let name = ctx.get("c").cloned().unwrap_or(Value::Nil);
//!                 ctx.insert("Greeting".into(), name)
//!             }),
//!     )
//!     .unwrap();
//!
//! let mut session = repository.compile().unwrap().create_session().unwrap();
//! session.insert("Customer", "Ada").unwrap();
//! assert_eq!(session.fire().unwrap(), 1);
//! assert_eq!(session.query("Greeting").len(), 1);
//! ```

pub use kestrel_debug as debug;
pub use kestrel_engine as engine;
pub use kestrel_foundation as foundation;
pub use kestrel_language as language;
pub use kestrel_storage as storage;

/// The types most programs need.
pub mod prelude {
    pub use kestrel_engine::{
        Activation, EngineEvent, RuleRepository, Session, SessionConfig, SessionFactory,
    };
    pub use kestrel_foundation::{Error, ErrorKind, FactId, Result, Value};
    pub use kestrel_language::{
        ActionElement, ActionTrigger, AggregateElement, Expr, FilterElement, PatternElement,
        Repeatability, RuleContext, RuleDefinition, RuleElement,
    };
    pub use kestrel_storage::{Fact, FactSchema, FactType, Identity};
}
