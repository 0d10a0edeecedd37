//! Expressions used in conditions, bindings, aggregates, filters, and priorities.
//!
//! The flow is: `Expr` (names) → [`bind`] → `BoundExpr` (slots) →
//! [`CompiledExpr`] (closure). Binding happens once per network node at
//! compile time; evaluation never looks at names again.
//!
//! # Module Structure
//!
//! - `ast` - The expression tree and native function handles
//! - `binder` - Name resolution into slots, structural sharing keys
//! - `compile` - Closure compilation and evaluation environments
//! - `ops` - Operator semantics over values

mod ast;
mod binder;
mod compile;
mod ops;


pub use ast::{BinaryOp, Expr, NativeFn, UnaryOp};
pub use binder::{BoundExpr, Scope, Slot, bind};
pub use compile::{Bindings, CompiledExpr, Env};
