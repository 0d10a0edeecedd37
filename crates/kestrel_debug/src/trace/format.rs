//! Trace output formatters.
//!
//! Provides human-readable and JSON formatters for trace records.

use std::fmt::Write;

use kestrel_foundation::{FactId, Value};
use serde_json::{Map, Number, Value as Json, json};

use super::record::{TraceEvent, TraceRecord, trigger_name};

// =============================================================================
// Trace Formatter Trait
// =============================================================================

/// Trait for formatting trace records.
pub trait TraceFormatter {
    /// Formats a single trace record.
    fn format(&self, record: &TraceRecord) -> String;

    /// Formats multiple records.
    fn format_many(&self, records: &[&TraceRecord]) -> String {
        records
            .iter()
            .map(|r| self.format(r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn id_list(ids: &[FactId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Human-Readable Formatter
// =============================================================================

/// Formats trace records in human-readable form.
#[derive(Clone, Debug, Default)]
pub struct HumanFormatter {
    /// Whether to include timestamps.
    pub show_timestamps: bool,
    /// Whether to include record ids.
    pub show_ids: bool,
}

impl HumanFormatter {
    /// Creates a formatter without timestamps or ids.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to show timestamps.
    #[must_use]
    pub fn with_timestamps(mut self) -> Self {
        self.show_timestamps = true;
        self
    }

    /// Builder method to show record ids.
    #[must_use]
    pub fn with_ids(mut self) -> Self {
        self.show_ids = true;
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn format_timestamp(ns: u64) -> String {
        let us = ns / 1000;
        if us >= 1_000_000 {
            format!("{:.3}s", us as f64 / 1_000_000.0)
        } else if us >= 1000 {
            format!("{:.3}ms", us as f64 / 1000.0)
        } else {
            format!("{us}us")
        }
    }

    fn describe(event: &TraceEvent) -> String {
        match event {
            TraceEvent::Fact {
                change,
                pending,
                fact_type,
                fact,
                value,
                previous,
            } => {
                let verb = change.to_string().to_uppercase();
                let marker = if *pending { "?" } else { "" };
                let id = fact.map(|f| format!("#{}", f.0)).unwrap_or_default();
                match previous {
                    Some(old) => format!("  {verb}{marker} {fact_type}{id} {old} -> {value}"),
                    None => format!("  {verb}{marker} {fact_type}{id} {value}"),
                }
            }
            TraceEvent::Activation {
                change,
                rule,
                facts,
            } => format!("    agenda {change} {rule} [{}]", id_list(facts)),
            TraceEvent::RuleFiring {
                rule,
                trigger,
                facts,
            } => format!(
                ">> FIRING {rule} ({}) [{}]",
                trigger_name(*trigger),
                id_list(facts)
            ),
            TraceEvent::RuleFired { rule, .. } => format!("<< FIRED {rule}"),
            TraceEvent::Evaluated {
                stage,
                expression,
                result,
                ..
            } => format!("    {stage} {expression} = {result}"),
            TraceEvent::Failed {
                stage,
                rule,
                expression,
                error,
                handled,
            } => {
                let rule = rule.as_deref().map(|r| format!(" in {r}")).unwrap_or_default();
                let handled = if *handled { " (handled)" } else { "" };
                format!("!! {stage} FAILED{rule}: {expression}: {error}{handled}")
            }
            TraceEvent::Halted { firings } => format!("== HALTED after {firings} firings"),
        }
    }
}

impl TraceFormatter for HumanFormatter {
    fn format(&self, record: &TraceRecord) -> String {
        let mut line = String::new();
        if self.show_ids {
            let _ = write!(line, "[{:06}] ", record.id);
        }
        let _ = write!(line, "C{:04} ", record.cycle);
        if self.show_timestamps {
            let _ = write!(line, "{:>10} ", Self::format_timestamp(record.timestamp_ns));
        }
        line.push_str(&Self::describe(&record.event));
        line
    }
}

// =============================================================================
// JSON Formatter
// =============================================================================

/// Formats trace records as JSON objects, one per record.
#[derive(Clone, Debug, Default)]
pub struct JsonFormatter {
    /// Whether `format_many` puts each record on its own line.
    pub pretty: bool,
}

impl JsonFormatter {
    /// Creates a compact JSON formatter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method for one record per line.
    #[must_use]
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Converts a value to plain JSON. Non-finite floats become strings.
    #[must_use]
    pub fn value(value: &Value) -> Json {
        match value {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => Json::from(*n),
            Value::Float(f) => {
                Number::from_f64(*f).map_or_else(|| Json::String(f.to_string()), Json::Number)
            }
            Value::String(s) => Json::String(s.to_string()),
            Value::Vec(items) => items.iter().map(Self::value).collect(),
            Value::Set(items) => items.iter().map(Self::value).collect(),
            Value::Map(entries) => {
                let fields: Map<String, Json> = entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Value::String(s) => s.to_string(),
                            other => other.to_string(),
                        };
                        (key, Self::value(v))
                    })
                    .collect();
                Json::Object(fields)
            }
        }
    }

    fn ids(ids: &[FactId]) -> Json {
        ids.iter().map(|id| Json::from(id.0)).collect()
    }

    fn fields(event: &TraceEvent) -> Json {
        match event {
            TraceEvent::Fact {
                change,
                pending,
                fact_type,
                fact,
                value,
                previous,
            } => json!({
                "change": change.to_string(),
                "pending": pending,
                "fact_type": fact_type.name(),
                "fact": fact.map(|f| f.0),
                "value": Self::value(value),
                "previous": previous.as_ref().map(Self::value),
            }),
            TraceEvent::Activation {
                change,
                rule,
                facts,
            } => json!({
                "change": change.to_string(),
                "rule": &**rule,
                "facts": Self::ids(facts),
            }),
            TraceEvent::RuleFiring {
                rule,
                trigger,
                facts,
            } => json!({
                "rule": &**rule,
                "trigger": trigger_name(*trigger),
                "facts": Self::ids(facts),
            }),
            TraceEvent::RuleFired { rule, trigger } => json!({
                "rule": &**rule,
                "trigger": trigger_name(*trigger),
            }),
            TraceEvent::Evaluated {
                stage,
                rule,
                expression,
                result,
            } => json!({
                "stage": stage.to_string(),
                "rule": rule.as_deref(),
                "expression": &**expression,
                "result": Self::value(result),
            }),
            TraceEvent::Failed {
                stage,
                rule,
                expression,
                error,
                handled,
            } => json!({
                "stage": stage.to_string(),
                "rule": rule.as_deref(),
                "expression": &**expression,
                "error": error,
                "handled": handled,
            }),
            TraceEvent::Halted { firings } => json!({ "firings": firings }),
        }
    }

    /// The JSON object for a record: header fields, then the event's fields.
    #[must_use]
    pub fn record(record: &TraceRecord) -> Json {
        let mut object = Map::new();
        object.insert("id".into(), Json::from(record.id));
        object.insert("cycle".into(), Json::from(record.cycle));
        object.insert("timestamp_ns".into(), Json::from(record.timestamp_ns));
        object.insert("type".into(), Json::from(record.event_type()));
        if let Json::Object(fields) = Self::fields(&record.event) {
            object.extend(fields);
        }
        Json::Object(object)
    }
}

impl TraceFormatter for JsonFormatter {
    fn format(&self, record: &TraceRecord) -> String {
        Self::record(record).to_string()
    }

    fn format_many(&self, records: &[&TraceRecord]) -> String {
        if self.pretty {
            let items: Vec<_> = records.iter().map(|r| self.format(r)).collect();
            format!("[\n  {}\n]", items.join(",\n  "))
        } else {
            records
                .iter()
                .map(|r| Self::record(r))
                .collect::<Json>()
                .to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::trace::record::{EvaluationStage, FactChange};
    use kestrel_language::ActionTrigger;
    use kestrel_storage::FactType;

    fn insert_record() -> TraceRecord {
        TraceRecord::new(
            7,
            2,
            1_500_000,
            TraceEvent::Fact {
                change: FactChange::Insert,
                pending: false,
                fact_type: FactType::from("Customer"),
                fact: Some(FactId(3)),
                value: Value::record([("name", Value::from("Ada \"A\""))]),
                previous: None,
            },
        )
    }

    #[test]
    fn human_fact_line() {
        let output = HumanFormatter::new().format(&insert_record());
        assert!(output.starts_with("C0002 "));
        assert!(output.contains("INSERT Customer#3"));
    }

    #[test]
    fn human_options() {
        let output = HumanFormatter::new()
            .with_ids()
            .with_timestamps()
            .format(&insert_record());
        assert!(output.starts_with("[000007] C0002"));
        assert!(output.contains("1.500ms"));
    }

    #[test]
    fn human_firing_and_failure() {
        let firing = TraceRecord::new(
            1,
            1,
            0,
            TraceEvent::RuleFiring {
                rule: Arc::from("Greet"),
                trigger: ActionTrigger::ACTIVATED,
                facts: vec![FactId(1), FactId(2)],
            },
        );
        assert!(
            HumanFormatter::new()
                .format(&firing)
                .contains(">> FIRING Greet (activated) [f1, f2]")
        );

        let failure = TraceRecord::new(
            2,
            1,
            0,
            TraceEvent::Failed {
                stage: EvaluationStage::Lhs,
                rule: Some(Arc::from("Ratio")),
                expression: Arc::from("a / b"),
                error: "division by zero".to_string(),
                handled: true,
            },
        );
        let line = HumanFormatter::new().format(&failure);
        assert!(line.contains("lhs FAILED in Ratio: a / b: division by zero (handled)"));
    }

    #[test]
    fn json_escapes_and_nests() {
        let output = JsonFormatter::new().format(&insert_record());
        assert!(output.starts_with("{\"id\":7,\"cycle\":2,"));
        assert!(output.contains("\"type\":\"FactInserted\""));
        assert!(output.contains("\"value\":{\"name\":\"Ada \\\"A\\\"\"}"));
        assert!(output.contains("\"previous\":null"));
        assert!(output.ends_with('}'));
    }

    #[test]
    fn json_many() {
        let record = insert_record();
        let records = [&record, &record];
        let compact = JsonFormatter::new().format_many(&records);
        assert!(compact.starts_with("[{") && compact.ends_with("}]"));
        let pretty = JsonFormatter::new().pretty().format_many(&records);
        assert_eq!(pretty.lines().count(), 4);
    }

    #[test]
    fn json_floats_stay_valid() {
        assert_eq!(JsonFormatter::value(&Value::Float(f64::NAN)), json!("NaN"));
        assert_eq!(JsonFormatter::value(&Value::Float(1.5)).to_string(), "1.5");
    }

    #[test]
    fn json_output_parses_back() {
        let line = JsonFormatter::new().format(&insert_record());
        let parsed: Json = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["fact"], json!(3));
        assert_eq!(parsed["value"]["name"], json!("Ada \"A\""));
        assert_eq!(parsed["pending"], json!(false));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serialized_record_matches_formatter() {
        let record = insert_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, JsonFormatter::record(&record));
    }
}
