//! Bounded outbound buffer with drop-oldest overflow
//!
//! The buffer sits between classification and publishing. It never blocks a
//! producer: inserting into a full buffer evicts the single oldest entry. Live
//! alerting favours fresh alerts, so an evicted entry is lost silently, even if
//! it is the head entry still waiting for a delivery confirmation.

use std::collections::VecDeque;

use crate::alerts::AlertEvent;

/// One alert bound for a downstream exchange
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEntry {
    pub exchange: String,
    pub routing_key: String,
    pub payload: AlertEvent,
}

/// Insertion-ordered FIFO with a fixed capacity
#[derive(Debug, Clone)]
pub struct RelayBuffer {
    entries: VecDeque<RelayEntry>,
    capacity: usize,
}

impl RelayBuffer {
    /// Create a buffer holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one, so a single alert can always be
    /// queued.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the entry evicted to make room, if any
    pub fn put(&mut self, entry: RelayEntry) -> Option<RelayEntry> {
        let evicted = if self.is_full() {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn peek_front(&self) -> Option<&RelayEntry> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<RelayEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayEntry> {
        self.entries.iter()
    }
}
