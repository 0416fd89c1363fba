//! Replay queue: the one-shot FIFO handed to a freshly admitted session.
//!
//! Produced and populated once by the room (the retained suffix for a
//! resuming client, or empty for a fresh joiner) and consumed by exactly
//! one session. While the session is still draining it, live deliveries
//! are appended to the tail so the peer sees one ordered stream.

use std::collections::VecDeque;

use crate::protocol::Event;

/// Single-use FIFO of events.
#[derive(Debug, Default)]
pub struct ReplayQueue {
    events: VecDeque<Event>,
}

impl ReplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a queue from events already in delivery order.
    pub fn from_events(events: Vec<Event>) -> Self {
        Self {
            events: events.into(),
        }
    }

    /// Append to the tail.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Take from the head.
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
