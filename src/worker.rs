//! The dedicated consumer that drains the operation queue.
//!
//! A single worker is mandatory: the index permits one writer per directory.
//! The loop blocks on the wakeup signal, drains a bounded batch, then pauses
//! so bursts from feed-refresh waves coalesce into few commits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::gateway::Shared;
use crate::index::SearchIndex;
use crate::index::recovery;
use crate::ops::{FinishedOperation, IndexOperation, Outcome};

/// Floor for one drain step; avoids useless percentage-based dwarf batches.
const DRAIN_FLOOR: usize = 200;

/// Worker entry point. Blocks on `wakeup` for new work; `stop` is a separate
/// signal that alone interrupts the pacing sleep, so enqueues landing during
/// the throttle window stay queued and coalesce into the next drain. Exits
/// when the running flag drops or either channel disconnects.
pub(crate) fn run(shared: Arc<Shared>, wakeup: Receiver<()>, stop: Receiver<()>) {
    tracing::debug!(target: "worker", "index worker started");

    while shared.running.load(Ordering::Acquire) {
        if wakeup.recv().is_err() {
            break;
        }
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        // Re-entrancy guard: a host-driven flush is already draining.
        if shared.flush_in_progress.load(Ordering::Acquire) {
            continue;
        }

        while shared.running.load(Ordering::Acquire) && !shared.queue.is_empty() {
            let batch_size = DRAIN_FLOOR.max(shared.queue.len() / 10);
            flush_pending(&shared, batch_size);

            if shared.running.load(Ordering::Acquire) {
                // Pacing sleep. Only stop cuts it short; work wakeups are not
                // consumed here, so a burst keeps queueing until the window
                // elapses.
                match stop.recv_timeout(shared.pacing) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
        }
    }

    tracing::debug!(target: "worker", "index worker stopped");
}

/// Drain up to `batch_size` operations. Raises the completion event exactly
/// once per dequeued operation; never requeues. `Optimize` is acknowledged
/// but not executed: it is the longest operation and the drain must stay
/// bounded.
pub(crate) fn flush_pending(shared: &Shared, batch_size: usize) {
    shared.flush_in_progress.store(true, Ordering::Release);
    let _guard = FlushGuard(&shared.flush_in_progress);

    let mut remaining = batch_size;
    while remaining > 0 {
        let Some(pending) = shared.queue.dequeue() else {
            break;
        };
        let kind = pending.op.kind();

        let outcome = if matches!(pending.op, IndexOperation::Optimize) {
            tracing::debug!(target: "worker", "skipping optimize during drain");
            Outcome::Skipped
        } else {
            perform(&shared.index, pending.op)
        };

        tracing::trace!(
            target: "worker",
            "drained {kind:?} ({outcome:?}) after {} ms in queue",
            pending.enqueued_at.elapsed().as_millis()
        );
        shared.notify_finished(FinishedOperation { kind, outcome });
        remaining -= 1;
    }

    // One commit per drain step: readers see the whole batch at once.
    if let Err(err) = shared.index.commit() {
        tracing::error!(target: "worker", "commit after drain failed: {err}");
    }
}

/// Execute one operation, routing failures through the recovery catalog.
/// The operation is consumed either way; partial progress beats a retry
/// storm.
fn perform(index: &SearchIndex, op: IndexOperation) -> Outcome {
    match execute(index, op) {
        Ok(()) => Outcome::Completed,
        Err(err) => {
            recovery::recover(index, &err);
            Outcome::Failed
        }
    }
}

fn execute(index: &SearchIndex, op: IndexOperation) -> crate::error::IndexResult<()> {
    match op {
        IndexOperation::Optimize => index.optimize(),
        IndexOperation::DeleteFeed(term) | IndexOperation::DeleteDocuments(term) => {
            index.delete(&term)
        }
        IndexOperation::AddDocument { doc, culture } => index.add(doc, culture.as_deref()),
        IndexOperation::AddDocuments { docs, culture } => {
            index.add_many(docs, culture.as_deref())
        }
    }
}

/// Clears `flush_in_progress` even when a drain unwinds.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
