//! Expressions and rule definitions for Kestrel.
//!
//! This crate provides:
//! - [`expr`] - Expression data, name binding, and compilation to closures
//! - [`declaration`] - Rule definitions and left-hand side normalisation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod declaration;
pub mod expr;

pub use declaration::{
    ActionElement, ActionTrigger, AggregateElement, BindingElement, FilterElement, GroupElement,
    GroupKind, PatternElement, Priority, Repeatability, RuleContext, RuleDefinition, RuleElement,
    SortDirection,
};
pub use expr::{BinaryOp, Bindings, CompiledExpr, Env, Expr, NativeFn, Scope, UnaryOp};
