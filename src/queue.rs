//! Thread-safe min-priority queue of pending operations.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::ops::{IndexOperation, PendingOperation};

/// Min-heap over [`PendingOperation`], lowest priority first, FIFO within a
/// band. Every method takes the internal lock once, so dequeue-if-nonempty is
/// a single atomic step and consumers poll rather than block.
pub struct OperationQueue {
    heap: Mutex<BinaryHeap<Reverse<PendingOperation>>>,
    next_seq: AtomicU64,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Stamp and insert an operation.
    pub fn enqueue(&self, op: IndexOperation) {
        let pending = PendingOperation {
            op,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            enqueued_at: Instant::now(),
        };
        self.lock().push(Reverse(pending));
    }

    /// Remove and return the lowest-priority operation, if any.
    pub fn dequeue(&self) -> Option<PendingOperation> {
        self.lock().pop().map(|Reverse(pending)| pending)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Discard all pending operations.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Reverse<PendingOperation>>> {
        self.heap.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for OperationQueue {
    fn default() -> Self {
        Self::new()
    }
}
