// ABOUTME: FIFO work queue with the single-flight guard.
// ABOUTME: Owned by the agent loop; nothing else mutates it.

use coven_relay_proto::Payload;
use std::collections::VecDeque;

/// A payload waiting for (or undergoing) processing.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedItem {
    pub payload: Payload,
    /// Submit attempts that failed because the surface was not ready.
    pub attempts: u32,
}

impl QueuedItem {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            attempts: 0,
        }
    }
}

/// Pending payloads in arrival order plus the in-flight guard.
///
/// At most one item is out of the queue at a time: `try_begin` hands out the
/// head only while the guard is clear and sets it; `finish` or `requeue_front`
/// clear it again.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<QueuedItem>,
    in_flight: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, payload: Payload) {
        self.items.push_back(QueuedItem::new(payload));
    }

    /// Take the head of the queue if nothing is in flight.
    pub fn try_begin(&mut self) -> Option<QueuedItem> {
        if self.in_flight {
            return None;
        }
        let item = self.items.pop_front()?;
        self.in_flight = true;
        Some(item)
    }

    /// The in-flight item has been reported.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Put the in-flight item back at the head for a later attempt.
    pub fn requeue_front(&mut self, item: QueuedItem) {
        self.items.push_front(item);
        self.in_flight = false;
    }

    /// Drop everything, including the guard. Returns how many queued items were lost.
    pub fn clear(&mut self) -> usize {
        let lost = self.items.len();
        self.items.clear();
        self.in_flight = false;
        lost
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }
}
