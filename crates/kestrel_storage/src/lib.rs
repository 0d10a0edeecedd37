//! Fact store, fact schemas, and type registry for Kestrel.
//!
//! This crate provides:
//! - [`Fact`] / [`FactType`] / [`FactSource`] - Facts in working memory
//! - [`FactSchema`] - Identity policy, supertypes, and field validation
//! - [`TypeRegistry`] - Schema lookup and supertype resolution
//! - [`FactStore`] - Identity-indexed fact table with O(1) snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod fact;
pub mod registry;
pub mod schema;
pub mod store;

pub use fact::{Fact, FactSource, FactType};
pub use registry::TypeRegistry;
pub use schema::{FactSchema, FieldSchema, Identity, KeyFn};
pub use store::FactStore;
