//! Core values, persistent collections, identifiers, and errors for Kestrel.
//!
//! This crate provides:
//! - [`Value`] - The dynamic value type carried by every fact
//! - [`FactId`] / [`TupleId`] - Identifiers for facts and partial matches
//! - [`Type`] - Type descriptors for fact schema validation
//! - [`Error`] - Rich error types with context
//! - Persistent collections ([`LtVec`], [`LtSet`], [`LtMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod error;
pub mod id;
pub mod types;
pub mod value;

pub use collections::{LtMap, LtSet, LtVec};
pub use error::{Error, ErrorContext, ErrorKind, SemanticLimit};
pub use id::{FactId, TupleId};
pub use types::Type;
pub use value::Value;

/// Result type alias for Kestrel operations.
pub type Result<T> = std::result::Result<T, Error>;
