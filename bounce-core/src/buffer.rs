//! Retention buffer: per-recipient runs of recently emitted events.
//!
//! Every event a room sends is appended here under the recipient's
//! client id, so a replacement session attaching with a resume-point can
//! be handed the exact suffix its predecessor missed. Entries older than
//! 1.1x the reconnection grace are evicted; the safety factor means a
//! resume request that starts right at the grace boundary still finds
//! its starting seq.
//!
//! All mutation happens inside the owning room's loop, so there is no
//! locking here. No entry outlives its room.

use std::collections::HashMap;
use std::time::Duration;

use crate::protocol::Event;
use crate::queue::ReplayQueue;

/// Time-bounded store of emitted events, keyed by client id.
#[derive(Debug)]
pub struct Buffer {
    entries: HashMap<String, Vec<Event>>,
    /// Keep window in ms: 1.1 x the reconnection grace.
    keep_ms: i64,
}

impl Buffer {
    /// `keep` is the retention window, normally
    /// [`Config::keep_window`](crate::Config::keep_window).
    pub fn new(keep: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            keep_ms: keep.as_millis() as i64,
        }
    }

    /// Append an event under `id`. Events arrive in emission order, so
    /// each entry stays sorted by `num`.
    pub fn add(&mut self, id: &str, event: Event) {
        self.entries.entry(id.to_string()).or_default().push(event);
    }

    /// Whether an event with this `num` is retained for `id`.
    pub fn available(&self, id: &str, num: i64) -> bool {
        self.entries
            .get(id)
            .is_some_and(|run| run.iter().any(|e| e.num == num))
    }

    /// The retained suffix for `id` starting at `num`, in original
    /// order. Empty if `id` is unknown or `num` is not retained.
    pub fn queue_from(&self, id: &str, num: i64) -> ReplayQueue {
        let Some(run) = self.entries.get(id) else {
            return ReplayQueue::new();
        };
        let Some(start) = run.iter().position(|e| e.num == num) else {
            return ReplayQueue::new();
        };
        ReplayQueue::from_events(run[start..].to_vec())
    }

    /// Drop everything retained for `id`.
    pub fn remove(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Evict events older than the keep window. Idempotent for anything
    /// newer than `now - keep`.
    pub fn clean(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.keep_ms;
        self.entries.retain(|_, run| {
            run.retain(|e| e.time >= cutoff);
            !run.is_empty()
        });
    }

    /// Number of ids with retained events.
    pub fn ids(&self) -> usize {
        self.entries.len()
    }

    /// Number of events retained for `id`.
    pub fn retained(&self, id: &str) -> usize {
        self.entries.get(id).map_or(0, Vec::len)
    }
}
