//! Rule definitions consumed by the network compiler.
//!
//! Rules are plain data: patterns, groups, quantifiers, bindings, aggregates,
//! agenda filters, priorities, and host actions. The [`transform`] pass turns
//! a rule's left-hand side into linear branches ready for compilation.
//!
//! # Module Structure
//!
//! - `types` - All rule element definitions
//! - `context` - The `RuleContext` trait actions receive
//! - `transform` - Simplification, `ForAll` rewriting, DNF expansion, validation

mod context;
mod transform;
mod types;


pub use context::RuleContext;
pub use transform::{BranchElement, RuleBranch, expand, rewrite_forall, simplify};
pub use types::{
    ActionElement, ActionFn, ActionTrigger, AggregateElement, BindingElement, FilterElement,
    GroupElement, GroupKind, NamedExpr, PatternElement, Priority, Repeatability, RuleDefinition,
    RuleElement, SortDirection,
};
