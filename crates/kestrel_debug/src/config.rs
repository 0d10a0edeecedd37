//! Configuration for the event tracer.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where trace output should be sent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TraceOutput {
    /// No output (records are still kept in the buffer).
    #[default]
    None,
    /// Write each record to stderr as it is recorded.
    Stderr,
    /// Emit each record as a `tracing` event at `TRACE` level.
    Log,
}

/// Configuration for the tracer.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TracerConfig {
    /// Whether tracing is enabled (false = zero overhead).
    pub enabled: bool,
    /// Maximum records kept in the buffer.
    pub buffer_size: usize,
    /// Event names to keep (empty = all).
    pub event_filter: Vec<String>,
    /// Whether streamed output uses JSON.
    pub json_format: bool,
    /// Where to stream records.
    pub output: TraceOutput,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer_size: 10_000,
            event_filter: Vec::new(),
            json_format: false,
            output: TraceOutput::None,
        }
    }
}

impl TracerConfig {
    /// Creates a disabled configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to enable tracing.
    #[must_use]
    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }

    /// Builder method to set the buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Builder method to keep only the named events.
    #[must_use]
    pub fn with_event_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_filter = names.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to use JSON output.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.json_format = true;
        self
    }

    /// Builder method to set the output destination.
    #[must_use]
    pub fn with_output(mut self, output: TraceOutput) -> Self {
        self.output = output;
        self
    }

    /// Returns true if events with this name are kept.
    #[must_use]
    pub fn accepts(&self, name: &str) -> bool {
        self.event_filter.is_empty() || self.event_filter.iter().any(|n| n == name)
    }
}
