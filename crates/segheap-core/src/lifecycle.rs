//! Structured heap lifecycle records.
//!
//! Every allocate/free decision, page growth and rejection can leave one
//! [`HeapLogRecord`] in a bounded ring owned by the heap. Records carry a
//! monotonic decision id, a correlation trace id and a snapshot of the heap
//! counters at the moment of the decision.

use std::collections::VecDeque;

use serde::Serialize;

/// Heap lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Counter values captured alongside a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub frees: u64,
    pub pages_mapped: usize,
    pub free_blocks: usize,
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id, starting at 1.
    pub decision_id: u64,
    /// Correlation id: `segheap::<symbol>::<decision id as 16 hex digits>`.
    pub trace_id: String,
    pub level: HeapLogLevel,
    /// API entry point (`allocate`, `deallocate`, `finalize`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `split`, `page_growth`, `coalesce`, ...).
    pub event: &'static str,
    /// Header or payload address involved in the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ptr: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    pub counters: CounterSnapshot,
}

/// Fields of one event before the log assigns ids.
#[derive(Debug, Clone)]
pub(crate) struct LogEvent {
    pub level: HeapLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub bin: Option<usize>,
    pub outcome: &'static str,
    pub details: String,
}

impl LogEvent {
    pub(crate) fn new(
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            level,
            symbol,
            event,
            ptr: None,
            size: None,
            bin: None,
            outcome,
            details: String::new(),
        }
    }

    pub(crate) fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub(crate) fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) fn bin(mut self, bin: usize) -> Self {
        self.bin = Some(bin);
        self
    }

    pub(crate) fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

/// Bounded ring of lifecycle records. The oldest record is evicted first.
#[derive(Debug, Clone)]
pub struct LifecycleLog {
    records: VecDeque<HeapLogRecord>,
    capacity: usize,
    next_decision_id: u64,
    evicted: u64,
}

impl LifecycleLog {
    /// A ring holding at most `capacity` records; 0 disables recording.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            next_decision_id: 1,
            evicted: 0,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.capacity > 0
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    pub(crate) fn record(&mut self, event: LogEvent, counters: CounterSnapshot) {
        if !self.enabled() {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("segheap::{}::{:016x}", event.symbol, decision_id);
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.records.push_back(HeapLogRecord {
            decision_id,
            trace_id,
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            bin: event.bin,
            outcome: event.outcome,
            details: event.details,
            counters,
        });
    }

    /// Records currently held, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HeapLogRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records dropped because the ring was full.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Removes and returns every held record.
    pub fn drain(&mut self) -> Vec<HeapLogRecord> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_event() -> LogEvent {
        LogEvent::new(HeapLogLevel::Trace, "allocate", "alloc", "served")
            .ptr(0x1000)
            .size(64)
            .bin(5)
    }

    #[test]
    fn records_get_ids_and_trace_ids() {
        let mut log = LifecycleLog::new(8);
        log.record(alloc_event(), CounterSnapshot::default());
        log.record(
            LogEvent::new(HeapLogLevel::Trace, "deallocate", "free", "filed"),
            CounterSnapshot::default(),
        );

        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[0].trace_id, "segheap::allocate::0000000000000001");
        assert_eq!(records[1].trace_id, "segheap::deallocate::0000000000000002");
        assert!(log.is_empty());
    }

    #[test]
    fn full_ring_evicts_oldest() {
        let mut log = LifecycleLog::new(2);
        for _ in 0..5 {
            log.record(alloc_event(), CounterSnapshot::default());
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.evicted(), 3);
        let ids: Vec<u64> = log.iter().map(|r| r.decision_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn zero_capacity_disables_recording() {
        let mut log = LifecycleLog::new(0);
        log.record(alloc_event(), CounterSnapshot::default());
        assert!(!log.enabled());
        assert!(log.is_empty());
        assert_eq!(log.evicted(), 0);
    }

    #[test]
    fn records_serialize_without_empty_fields() {
        let mut log = LifecycleLog::new(4);
        log.record(
            LogEvent::new(HeapLogLevel::Info, "finalize", "finalize", "reported"),
            CounterSnapshot::default(),
        );
        let json = serde_json::to_value(&log.drain()[0]).expect("serialize");
        assert_eq!(json["level"], "info");
        assert!(json.get("ptr").is_none());
        assert_eq!(json["counters"]["requests"], 0);
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(HeapLogLevel::Trace < HeapLogLevel::Debug);
        assert!(HeapLogLevel::Warn < HeapLogLevel::Error);
    }
}
