//! Offline queue for operations generated while disconnected.
//!
//! Entries are replayed in enqueue order on reconnection, exactly once,
//! with no coalescing: three queued updates to the same block are three
//! sends. Capacity is bounded; on overflow the oldest entry is evicted.

use std::collections::VecDeque;
use tokio::time::Instant;

use crate::protocol::{HubRequest, RoleChangeRequest, TextBlockDelete, TextBlockUpdate};

pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Update,
    Delete,
    RoleChange,
}

/// A queued outbound operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuedOp {
    Update(TextBlockUpdate),
    Delete(TextBlockDelete),
    RoleChange(RoleChangeRequest),
}

impl QueuedOp {
    pub fn kind(&self) -> OperationKind {
        match self {
            QueuedOp::Update(_) => OperationKind::Update,
            QueuedOp::Delete(_) => OperationKind::Delete,
            QueuedOp::RoleChange(_) => OperationKind::RoleChange,
        }
    }

    pub fn into_request(self) -> HubRequest {
        match self {
            QueuedOp::Update(update) => HubRequest::UpdateTextBlock(update),
            QueuedOp::Delete(delete) => HubRequest::DeleteTextBlock(delete),
            QueuedOp::RoleChange(change) => HubRequest::ChangeUserRole(change),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedOperation {
    pub op: QueuedOp,
    pub enqueued_at: Instant,
}

pub struct OfflineQueue {
    queue: VecDeque<QueuedOperation>,
    capacity: usize,
    /// Entries evicted since creation
    dropped: u64,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Queue an operation. Returns the entry evicted to make room, if any.
    pub fn enqueue(&mut self, op: QueuedOp, now: Instant) -> Option<QueuedOperation> {
        self.queue.push_back(QueuedOperation { op, enqueued_at: now });
        self.evict_overflow()
    }

    /// Take every entry, oldest first.
    pub fn drain(&mut self) -> Vec<QueuedOperation> {
        self.queue.drain(..).collect()
    }

    /// Put entries that could not be replayed back at the head, keeping
    /// their order ahead of anything queued since.
    pub fn requeue_front(&mut self, entries: Vec<QueuedOperation>) {
        for entry in entries.into_iter().rev() {
            self.queue.push_front(entry);
        }
        while self.evict_overflow().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.queue.iter()
    }

    fn evict_overflow(&mut self) -> Option<QueuedOperation> {
        if self.queue.len() <= self.capacity {
            return None;
        }
        let evicted = self.queue.pop_front();
        if let Some(entry) = &evicted {
            self.dropped += 1;
            log::warn!("Offline queue full, dropping oldest {:?} operation", entry.op.kind());
        }
        evicted
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
