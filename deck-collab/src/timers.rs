//! Timer scheduling for the client actor.
//!
//! A min-heap of deadlines. The actor sleeps until [`Timers::next_deadline`]
//! and then drains everything due with [`Timers::pop_due`]. Nothing polls:
//! each pending-update expiry, debounce and reconnect is a scheduled entry.
//!
//! Debounces are cancel-and-replace. Scheduling a debounce for an id that
//! already has one bumps its generation; the superseded heap entry still
//! fires but is recognized as stale and discarded.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Pending-update mark for an element may have expired
    PendingExpiry { id: String },
    /// Debounced local edit is ready to send
    Debounce { id: String, generation: u64 },
    /// Reconnect attempt after backoff
    Reconnect { generation: u64 },
}

#[derive(Debug, PartialEq, Eq)]
struct Scheduled {
    at: Instant,
    seq: u64,
    kind: TimerKind,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct Timers {
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
    debounces: HashMap<String, u64>,
    debounce_generation: u64,
    reconnect_generation: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, kind: TimerKind) {
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            kind,
        }));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.at)
    }

    /// Pop the earliest timer if it is due. Stale debounces and superseded
    /// reconnects are skipped.
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerKind> {
        loop {
            let due = self.heap.peek().is_some_and(|Reverse(s)| s.at <= now);
            if !due {
                return None;
            }
            let Reverse(scheduled) = self.heap.pop()?;
            match &scheduled.kind {
                TimerKind::Debounce { id, generation } => {
                    if self.debounces.get(id) != Some(generation) {
                        continue;
                    }
                    self.debounces.remove(id);
                }
                TimerKind::Reconnect { generation } if *generation != self.reconnect_generation => {
                    continue;
                }
                _ => {}
            }
            return Some(scheduled.kind);
        }
    }

    // ─── Debounce ──────────────────────────────────────────────────

    /// (Re)start the debounce for `id`, cancelling any earlier one.
    pub fn debounce(&mut self, id: &str, at: Instant) {
        self.debounce_generation += 1;
        let generation = self.debounce_generation;
        self.debounces.insert(id.to_string(), generation);
        self.schedule(
            at,
            TimerKind::Debounce {
                id: id.to_string(),
                generation,
            },
        );
    }

    /// Cancel the debounce for `id`. Returns whether one was armed.
    pub fn cancel_debounce(&mut self, id: &str) -> bool {
        self.debounces.remove(id).is_some()
    }

    pub fn has_debounce(&self, id: &str) -> bool {
        self.debounces.contains_key(id)
    }

    // ─── Reconnect ─────────────────────────────────────────────────

    /// Schedule a reconnect, superseding any earlier one.
    pub fn schedule_reconnect(&mut self, at: Instant) {
        self.reconnect_generation += 1;
        let generation = self.reconnect_generation;
        self.schedule(at, TimerKind::Reconnect { generation });
    }

    pub fn cancel_reconnect(&mut self) {
        self.reconnect_generation += 1;
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
