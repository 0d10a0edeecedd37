//! Event tracing, network diagnostics, and log setup for Kestrel.
//!
//! This crate provides:
//! - [`Tracer`] - Records session events into a bounded [`TraceBuffer`]
//! - [`HumanFormatter`] / [`JsonFormatter`] - Render trace records
//! - [`schema`] - Text and Graphviz renderings of a compiled network
//! - [`logging`] - `tracing-subscriber` setup

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod schema;
pub mod trace;

pub use config::{TraceOutput, TracerConfig};
pub use trace::{
    HumanFormatter, JsonFormatter, SharedTracer, TraceBuffer, TraceBufferStats, TraceEvent,
    TraceFormatter, TraceRecord, Tracer,
};
