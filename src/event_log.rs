//! Bounded client-side event log.
//!
//! Holds the most recent events in arrival order, newest first, with a
//! fixed capacity. Eviction never touches the running `total` counter;
//! only [`EventLog::clear`] (the session's reset operation) resets it.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::protocol::Event;

/// Shared reference to the log for thread-safe read access.
///
/// The session supervisor is the only writer; readers (presentation,
/// tests) take short read locks for snapshots.
pub type SharedEventLog = Arc<RwLock<EventLog>>;

/// Capacity-bounded, most-recent-first event buffer.
#[derive(Debug)]
pub struct EventLog {
    entries: VecDeque<Event>,
    capacity: usize,
    total: u64,
}

impl EventLog {
    /// Creates an empty log retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    /// Wraps a new log in the shared handle the session hands out.
    #[must_use]
    pub fn shared(capacity: usize) -> SharedEventLog {
        Arc::new(RwLock::new(Self::new(capacity)))
    }

    /// Ingest one decoded event. Always succeeds.
    ///
    /// Prepends the event and evicts exactly one tail entry when the log
    /// would exceed capacity. No deduplication: replays and out-of-order
    /// arrivals after a reconnect are kept as-is.
    pub fn ingest(&mut self, event: Event) {
        self.total += 1;
        self.entries.push_front(event);
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Number of events currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total events ingested since the last clear, unaffected by eviction.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Most recently ingested event, if any.
    #[must_use]
    pub fn head(&self) -> Option<&Event> {
        self.entries.front()
    }

    /// Oldest retained event, if any.
    #[must_use]
    pub fn tail(&self) -> Option<&Event> {
        self.entries.back()
    }

    /// Iterate retained events, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter()
    }

    /// Drop all retained events and reset `total`.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> Event {
        Event {
            ts: Some(format!("t{n}")),
            kind: "bus".to_string(),
            source: None,
            topic: Some(serde_json::Value::String(format!("topic{n}"))),
            payload: None,
            meta: None,
        }
    }

    #[test]
    fn test_capacity_invariant() {
        let mut log = EventLog::new(10);
        for n in 0..25 {
            log.ingest(event(n));
            assert!(log.len() <= 10);
            assert_eq!(log.len(), (n + 1).min(10));
            assert_eq!(log.head().unwrap().ts.as_deref(), Some(format!("t{n}").as_str()));
        }
    }

    #[test]
    fn test_eviction_order() {
        // Ingesting E1..E1001 leaves E2..E1001 with E1001 at the head
        // and E2 at the tail.
        let mut log = EventLog::new(1000);
        for n in 1..=1001 {
            log.ingest(event(n));
        }
        assert_eq!(log.len(), 1000);
        assert_eq!(log.head().unwrap().ts.as_deref(), Some("t1001"));
        assert_eq!(log.tail().unwrap().ts.as_deref(), Some("t2"));
    }

    #[test]
    fn test_total_survives_eviction() {
        let mut log = EventLog::new(3);
        for n in 0..8 {
            log.ingest(event(n));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.total(), 8);
    }

    #[test]
    fn test_duplicates_kept() {
        let mut log = EventLog::new(10);
        log.ingest(event(1));
        log.ingest(event(1));
        assert_eq!(log.len(), 2);
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut log = EventLog::new(10);
        for n in 0..5 {
            log.ingest(event(n));
        }
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.total(), 0);
        assert!(log.head().is_none());
    }

    #[test]
    fn test_iter_newest_first() {
        let mut log = EventLog::new(10);
        for n in 0..3 {
            log.ingest(event(n));
        }
        let order: Vec<_> = log.iter().map(|e| e.ts.clone().unwrap()).collect();
        assert_eq!(order, vec!["t2", "t1", "t0"]);
    }
}
