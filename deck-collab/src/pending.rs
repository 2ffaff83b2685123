//! Echo filter for locally-originated updates.
//!
//! The hub broadcasts every update to all participants, the sender
//! included. Before sending, the client marks the element id as pending;
//! while the mark is live, an inbound update for that id is the client's
//! own echo and is dropped.
//!
//! Marks expire through a scheduled removal: [`PendingUpdates::mark_pending`]
//! returns the expiry instant, the caller arms a timer for it and calls
//! [`PendingUpdates::expire`] when it fires. Re-marking an id moves its
//! deadline forward, so earlier timers find a later deadline and leave the
//! entry alone (last expiry wins).

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_PENDING_WINDOW: Duration = Duration::from_millis(1000);

#[derive(Debug)]
pub struct PendingUpdates {
    window: Duration,
    /// Element id → instant its mark expires
    entries: HashMap<String, Instant>,
}

impl PendingUpdates {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Mark `id` as having an outstanding local update. Returns the instant
    /// at which the mark should be expired.
    pub fn mark_pending(&mut self, id: &str, now: Instant) -> Instant {
        let deadline = now + self.window;
        self.entries.insert(id.to_string(), deadline);
        deadline
    }

    pub fn is_pending(&self, id: &str, now: Instant) -> bool {
        self.entries.get(id).is_some_and(|deadline| *deadline > now)
    }

    /// Scheduled removal. Only removes the entry if its current deadline
    /// has passed; returns whether it was removed.
    pub fn expire(&mut self, id: &str, now: Instant) -> bool {
        match self.entries.get(id) {
            Some(deadline) if *deadline <= now => {
                self.entries.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Drop a mark immediately, e.g. when the send it guarded failed.
    pub fn clear(&mut self, id: &str) {
        self.entries.remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for PendingUpdates {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mark_and_expire() {
        let mut pending = PendingUpdates::default();
        let start = Instant::now();
        let deadline = pending.mark_pending("t1", start);

        assert_eq!(deadline, start + Duration::from_millis(1000));
        assert!(pending.is_pending("t1", start));
        assert!(!pending.is_pending("t2", start));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(pending.is_pending("t1", Instant::now()));
        assert!(!pending.expire("t1", Instant::now()));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!pending.is_pending("t1", Instant::now()));
        assert!(pending.expire("t1", Instant::now()));
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remark_extends_window() {
        let mut pending = PendingUpdates::default();
        let first = pending.mark_pending("t1", Instant::now());

        tokio::time::advance(Duration::from_millis(600)).await;
        let second = pending.mark_pending("t1", Instant::now());
        assert!(second > first);

        // The first timer fires but the entry now belongs to the second mark.
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(!pending.expire("t1", Instant::now()));
        assert!(pending.is_pending("t1", Instant::now()));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(pending.expire("t1", Instant::now()));
    }

    #[test]
    fn test_clear() {
        let mut pending = PendingUpdates::new(Duration::from_secs(5));
        let now = Instant::now();
        pending.mark_pending("t1", now);
        pending.clear("t1");
        assert!(!pending.is_pending("t1", now));
        assert_eq!(pending.len(), 0);
    }
}
