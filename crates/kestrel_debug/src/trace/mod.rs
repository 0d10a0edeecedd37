//! Event tracing for sessions.
//!
//! A [`Tracer`] records [`EngineEvent`]s into a bounded [`TraceBuffer`] and
//! costs one branch per event when disabled. Attach it to a session with
//! [`Tracer::attach`]; the session's handler and the caller then share it
//! through a [`SharedTracer`].
//!
//! ```text
//! let tracer = Tracer::shared(TracerConfig::new().enabled());
//! Tracer::attach(&tracer, &mut session);
//! session.insert("Customer", value)?;
//! session.fire()?;
//! let lines = tracer.lock().map(|t| t.format_recent(20));
//! ```

pub mod buffer;
pub mod format;
pub mod record;

pub use buffer::{TraceBuffer, TraceBufferStats};
pub use format::{HumanFormatter, JsonFormatter, TraceFormatter};
pub use record::{ActivationChange, EvaluationStage, FactChange, TraceEvent, TraceRecord};

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kestrel_engine::{EngineEvent, Session};

use crate::config::{TraceOutput, TracerConfig};

/// A tracer shared between a session's event handler and its owner.
pub type SharedTracer = Arc<Mutex<Tracer>>;

// =============================================================================
// Tracer
// =============================================================================

/// Records session events.
#[derive(Debug)]
pub struct Tracer {
    config: TracerConfig,
    buffer: TraceBuffer,
    cycle: u64,
    start_time: Instant,
    human_formatter: HumanFormatter,
    json_formatter: JsonFormatter,
}

impl Tracer {
    /// Creates a tracer with the given configuration.
    #[must_use]
    pub fn new(config: TracerConfig) -> Self {
        let buffer = TraceBuffer::new(config.buffer_size);
        Self {
            config,
            buffer,
            cycle: 0,
            start_time: Instant::now(),
            human_formatter: HumanFormatter::new().with_timestamps(),
            json_formatter: JsonFormatter::new(),
        }
    }

    /// Creates a disabled tracer.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(TracerConfig::default())
    }

    /// Creates a tracer ready to be attached to sessions.
    #[must_use]
    pub fn shared(config: TracerConfig) -> SharedTracer {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Subscribes the tracer to a session's events.
    ///
    /// Handlers run in registration order, so attach the tracer before any
    /// handler whose effects (such as setting `handled`) it should not see.
    pub fn attach(tracer: &SharedTracer, session: &mut Session) {
        let tracer = Arc::clone(tracer);
        session.subscribe(move |event| {
            if let Ok(mut tracer) = tracer.lock() {
                tracer.record(event);
            }
        });
    }

    /// Returns whether tracing is enabled.
    #[must_use]
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Enables tracing.
    pub fn enable(&mut self) {
        self.config.enabled = true;
    }

    /// Disables tracing.
    pub fn disable(&mut self) {
        self.config.enabled = false;
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Number of firings seen so far.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Sets whether streamed and formatted output uses JSON.
    pub fn set_json_format(&mut self, json: bool) {
        self.config.json_format = json;
    }

    /// Sets where records are streamed.
    pub fn set_output(&mut self, output: TraceOutput) {
        self.config.output = output;
    }

    /// Records an event; returns immediately when disabled.
    #[inline]
    pub fn record(&mut self, event: &EngineEvent) {
        if !self.config.enabled {
            return;
        }
        self.record_enabled(event);
    }

    fn record_enabled(&mut self, event: &EngineEvent) {
        if matches!(event, EngineEvent::RuleFiring(_)) {
            self.cycle += 1;
        }
        if !self.config.accepts(event.name()) {
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let timestamp_ns = self.start_time.elapsed().as_nanos() as u64;
        self.buffer
            .push(self.cycle, timestamp_ns, TraceEvent::from(event));

        if self.config.output == TraceOutput::None {
            return;
        }
        let Some(record) = self.buffer.last() else {
            return;
        };
        let line = self.format_record(record);
        match self.config.output {
            TraceOutput::Stderr => {
                let _ = writeln!(io::stderr(), "{line}");
            }
            TraceOutput::Log => tracing::trace!(target: "kestrel::trace", "{line}"),
            TraceOutput::None => {}
        }
    }

    /// Formats a record using the configured format.
    #[must_use]
    pub fn format_record(&self, record: &TraceRecord) -> String {
        if self.config.json_format {
            self.json_formatter.format(record)
        } else {
            self.human_formatter.format(record)
        }
    }

    /// Formats records using the configured format.
    #[must_use]
    pub fn format_records(&self, records: &[&TraceRecord]) -> String {
        if self.config.json_format {
            self.json_formatter.format_many(records)
        } else {
            self.human_formatter.format_many(records)
        }
    }

    /// Formats the most recent `count` records.
    #[must_use]
    pub fn format_recent(&self, count: usize) -> String {
        self.format_records(&self.buffer.recent(count))
    }

    /// The trace buffer.
    #[must_use]
    pub fn buffer(&self) -> &TraceBuffer {
        &self.buffer
    }

    /// Clears the buffer and resets the cycle counter.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cycle = 0;
    }

    /// Buffer statistics.
    #[must_use]
    pub fn stats(&self) -> TraceBufferStats {
        self.buffer.stats()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_engine::FiringEvent;
    use kestrel_language::ActionTrigger;

    fn firing(rule: &str) -> EngineEvent {
        EngineEvent::RuleFiring(FiringEvent {
            rule: Arc::from(rule),
            trigger: ActionTrigger::ACTIVATED,
            facts: Vec::new(),
        })
    }

    #[test]
    fn disabled_by_default() {
        let mut tracer = Tracer::default();
        tracer.record(&firing("A"));
        assert!(!tracer.is_enabled());
        assert!(tracer.buffer().is_empty());
        assert_eq!(tracer.cycle(), 0);
    }

    #[test]
    fn enable_disable() {
        let mut tracer = Tracer::default();
        tracer.enable();
        tracer.record(&firing("A"));
        tracer.disable();
        tracer.record(&firing("B"));
        assert_eq!(tracer.buffer().len(), 1);
    }

    #[test]
    fn firings_advance_the_cycle() {
        let mut tracer = Tracer::new(TracerConfig::new().enabled());
        tracer.record(&EngineEvent::FireHalted { firings: 0 });
        tracer.record(&firing("A"));
        tracer.record(&firing("B"));
        let cycles: Vec<_> = tracer.buffer().iter().map(|r| r.cycle).collect();
        assert_eq!(cycles, vec![0, 1, 2]);
    }

    #[test]
    fn event_filter_still_counts_cycles() {
        let config = TracerConfig::new()
            .enabled()
            .with_event_filter(["FireHalted"]);
        let mut tracer = Tracer::new(config);
        tracer.record(&firing("A"));
        tracer.record(&EngineEvent::FireHalted { firings: 1 });
        assert_eq!(tracer.buffer().len(), 1);
        assert_eq!(tracer.buffer().iter().next().map(|r| r.cycle), Some(1));
    }

    #[test]
    fn format_follows_config() {
        let mut tracer = Tracer::new(TracerConfig::new().enabled());
        tracer.record(&firing("A"));
        assert!(tracer.format_recent(1).contains("FIRING A"));
        tracer.set_json_format(true);
        assert!(tracer.format_recent(1).starts_with("[{\"id\":0"));
    }

    #[test]
    fn attached_tracer_sees_a_session() {
        use kestrel_engine::RuleRepository;
        use kestrel_foundation::Value;
        use kestrel_language::{PatternElement, RuleDefinition};

        let mut repository = RuleRepository::new();
        repository
            .add_rule(
                RuleDefinition::new("Greet")
                    .when(PatternElement::new("c", "Customer"))
                    .then(|ctx| ctx.insert("Greeting".into(), Value::from("hi"))),
            )
            .unwrap();
        let mut session = repository.compile().unwrap().create_session().unwrap();
        let tracer = Tracer::shared(TracerConfig::new().enabled());
        Tracer::attach(&tracer, &mut session);

        session.insert("Customer", Value::from("Ada")).unwrap();
        session.fire().unwrap();

        let tracer = tracer.lock().unwrap();
        let names: Vec<_> = tracer.buffer().iter().map(TraceRecord::event_type).collect();
        assert_eq!(
            names,
            vec![
                "FactInserting",
                "ActivationCreated",
                "FactInserted",
                "RuleFiring",
                "FactInserting",
                "FactInserted",
                "RuleFired",
            ]
        );
        assert_eq!(tracer.cycle(), 1);
        assert_eq!(tracer.buffer().by_rule("Greet").len(), 3);
    }

    #[test]
    fn clear_resets() {
        let mut tracer = Tracer::new(TracerConfig::new().enabled());
        tracer.record(&firing("A"));
        tracer.clear();
        assert!(tracer.buffer().is_empty());
        assert_eq!(tracer.cycle(), 0);
        assert_eq!(tracer.stats().record_count, 0);
    }
}
