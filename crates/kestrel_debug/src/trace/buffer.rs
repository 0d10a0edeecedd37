//! Ring buffer for trace records.
//!
//! Keeps the most recent records up to a fixed size, discarding the oldest
//! when full.

use std::collections::{BTreeMap, VecDeque};

use super::record::{TraceEvent, TraceRecord};

// =============================================================================
// Trace Buffer
// =============================================================================

/// A bounded buffer of trace records, oldest first.
#[derive(Clone, Debug)]
pub struct TraceBuffer {
    records: VecDeque<TraceRecord>,
    max_size: usize,
    /// Next record id; never reset so ids stay unique across clears.
    next_id: u64,
}

impl TraceBuffer {
    /// Creates a buffer holding at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            next_id: 0,
        }
    }

    /// Appends an event and returns its record id.
    pub fn push(&mut self, cycle: u64, timestamp_ns: u64, event: TraceEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.max_size == 0 {
            return id;
        }
        while self.records.len() >= self.max_size {
            self.records.pop_front();
        }
        self.records
            .push_back(TraceRecord::new(id, cycle, timestamp_ns, event));
        id
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Iterates over the records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// The most recent record.
    #[must_use]
    pub fn last(&self) -> Option<&TraceRecord> {
        self.records.back()
    }

    /// Records of one firing cycle.
    #[must_use]
    pub fn records_for_cycle(&self, cycle: u64) -> Vec<&TraceRecord> {
        self.filter(|r| r.cycle == cycle)
    }

    /// Records in an inclusive cycle range.
    #[must_use]
    pub fn records_in_range(&self, start: u64, end: u64) -> Vec<&TraceRecord> {
        self.filter(|r| (start..=end).contains(&r.cycle))
    }

    /// The most recent `count` records, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<&TraceRecord> {
        let start = self.records.len().saturating_sub(count);
        self.records.iter().skip(start).collect()
    }

    /// Records matching a predicate.
    pub fn filter<F>(&self, predicate: F) -> Vec<&TraceRecord>
    where
        F: Fn(&TraceRecord) -> bool,
    {
        self.records.iter().filter(|r| predicate(r)).collect()
    }

    /// Records with the given event name.
    #[must_use]
    pub fn by_event_type(&self, event_type: &str) -> Vec<&TraceRecord> {
        self.filter(|r| r.event_type() == event_type)
    }

    /// Records concerning a rule.
    #[must_use]
    pub fn by_rule(&self, rule: &str) -> Vec<&TraceRecord> {
        self.filter(|r| r.event.rule() == Some(rule))
    }

    /// Summary of the buffer contents.
    #[must_use]
    pub fn stats(&self) -> TraceBufferStats {
        let mut event_counts = BTreeMap::new();
        for record in &self.records {
            *event_counts.entry(record.event_type()).or_insert(0) += 1;
        }
        TraceBufferStats {
            record_count: self.records.len(),
            max_size: self.max_size,
            dropped: self.next_id - self.records.len() as u64,
            oldest_cycle: self.records.front().map(|r| r.cycle),
            newest_cycle: self.records.back().map(|r| r.cycle),
            event_counts,
        }
    }
}

impl Default for TraceBuffer {
    fn default() -> Self {
        Self::new(10_000)
    }
}

/// Statistics about a trace buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceBufferStats {
    /// Records currently held.
    pub record_count: usize,
    /// Maximum buffer size.
    pub max_size: usize,
    /// Records pushed but no longer held (evicted or cleared).
    pub dropped: u64,
    /// Cycle of the oldest record.
    pub oldest_cycle: Option<u64>,
    /// Cycle of the newest record.
    pub newest_cycle: Option<u64>,
    /// Count per event name.
    pub event_counts: BTreeMap<&'static str, usize>,
}
