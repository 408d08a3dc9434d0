//! Public facade over the queue, the worker, and the index handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::config::Settings;
use crate::document::{DocTerm, ItemDocument};
use crate::error::IndexResult;
use crate::index::SearchIndex;
use crate::ops::{FinishedOperation, IndexOperation};
use crate::queue::OperationQueue;
use crate::worker;

/// On shutdown at most this many queued operations are drained. Draining the
/// whole queue can hang the host's exit; the rest is dropped knowingly.
const SHUTDOWN_DRAIN_MAX: usize = 10;

/// Poll interval while waiting out an active drain during stop.
const STOP_POLL: Duration = Duration::from_millis(50);

/// State shared between the facade and the worker thread.
pub(crate) struct Shared {
    pub(crate) queue: OperationQueue,
    pub(crate) index: SearchIndex,
    pub(crate) running: AtomicBool,
    pub(crate) flush_in_progress: AtomicBool,
    pub(crate) pacing: Duration,
    subscribers: Mutex<Vec<Sender<FinishedOperation>>>,
}

impl Shared {
    /// Fan a completion event out to live subscribers; dead ones are pruned.
    pub(crate) fn notify_finished(&self, event: FinishedOperation) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|sender| sender.send(event).is_ok());
    }
}

/// The serializing gateway in front of the index.
///
/// Producers on any thread enqueue mutations; one dedicated worker applies
/// them. After [`stop`](Self::stop) producers become silent no-ops.
pub struct IndexModifier {
    shared: Arc<Shared>,
    wakeup: Sender<()>,
    stop_signal: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexModifier {
    /// Open the index and start the worker thread.
    pub fn start(settings: &Settings) -> IndexResult<Self> {
        let (modifier, wakeup_rx, stop_rx) = Self::build(settings)?;
        let shared = Arc::clone(&modifier.shared);
        let handle = thread::Builder::new()
            .name("feedsearch-worker".to_string())
            .spawn(move || worker::run(shared, wakeup_rx, stop_rx))?;
        *modifier.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(modifier)
    }

    fn build(settings: &Settings) -> IndexResult<(Self, Receiver<()>, Receiver<()>)> {
        let index = SearchIndex::open(settings)?;
        let shared = Arc::new(Shared {
            queue: OperationQueue::new(),
            index,
            running: AtomicBool::new(true),
            flush_in_progress: AtomicBool::new(false),
            pacing: Duration::from_millis(settings.tuning.pacing_ms),
            subscribers: Mutex::new(Vec::new()),
        });
        let (wakeup_tx, wakeup_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded(1);
        Ok((
            Self {
                shared,
                wakeup: wakeup_tx,
                stop_signal: stop_tx,
                worker: Mutex::new(None),
            },
            wakeup_rx,
            stop_rx,
        ))
    }

    /// Gateway without a worker thread; drains are driven explicitly.
    #[cfg(test)]
    pub(crate) fn start_paused(settings: &Settings) -> IndexResult<Self> {
        let (modifier, _wakeup_rx, _stop_rx) = Self::build(settings)?;
        Ok(modifier)
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    #[cfg(test)]
    pub(crate) fn index(&self) -> &SearchIndex {
        &self.shared.index
    }

    /// Queue a single document for indexing.
    pub fn add(&self, doc: ItemDocument, culture: Option<&str>) {
        self.enqueue(IndexOperation::AddDocument {
            doc,
            culture: culture.map(str::to_string),
        });
    }

    /// Queue a batch of documents sharing one culture.
    pub fn add_many(&self, docs: Vec<ItemDocument>, culture: Option<&str>) {
        self.enqueue(IndexOperation::AddDocuments {
            docs,
            culture: culture.map(str::to_string),
        });
    }

    /// Queue deletion of the documents matching `term`.
    pub fn delete(&self, term: DocTerm) {
        self.enqueue(IndexOperation::DeleteDocuments(term));
    }

    /// Queue removal of a whole feed. Same action as [`delete`](Self::delete)
    /// but drained ahead of pending item adds, so a removed feed is not
    /// re-populated from the queue.
    pub fn delete_feed(&self, feed: impl Into<String>) {
        self.enqueue(IndexOperation::DeleteFeed(DocTerm::feed(feed)));
    }

    /// Queue a segment merge.
    pub fn optimize(&self) {
        self.enqueue(IndexOperation::Optimize);
    }

    fn enqueue(&self, op: IndexOperation) {
        if !self.shared.running.load(Ordering::Acquire) {
            tracing::debug!(target: "gateway", "ignoring {:?} after stop", op.kind());
            return;
        }
        self.shared.queue.enqueue(op);
        let _ = self.wakeup.try_send(());
    }

    /// Receive one [`FinishedOperation`] per drained operation.
    pub fn subscribe(&self) -> Receiver<FinishedOperation> {
        let (tx, rx) = unbounded();
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Pending operations not yet drained.
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Live documents visible to readers.
    pub fn num_docs(&self) -> IndexResult<u64> {
        self.shared.index.num_docs()
    }

    /// Count documents matching a key term. Verification probe.
    pub fn count_term(&self, term: &DocTerm) -> IndexResult<u64> {
        self.shared.index.count_term(term)
    }

    /// Buffered-batch commits performed so far. Host status display.
    pub fn num_commits(&self) -> u64 {
        self.shared.index.num_commits()
    }

    /// Flush the index. When `close` is set, first drain at most
    /// [`SHUTDOWN_DRAIN_MAX`] queued operations, then close the writer
    /// without reopening. Errors are logged, never propagated.
    pub fn flush(&self, close: bool) {
        if close {
            let bound = self.shared.queue.len().min(SHUTDOWN_DRAIN_MAX);
            if bound > 0 {
                worker::flush_pending(&self.shared, bound);
            }
        }
        if let Err(err) = self.shared.index.flush(close) {
            tracing::error!(target: "gateway", "index flush failed: {err}");
        }
    }

    /// Discard every pending operation and recreate the index empty.
    pub fn reset(&self) -> IndexResult<()> {
        self.shared.queue.clear();
        self.shared.index.reset()
    }

    /// Stop accepting work, wait out an active drain, then run the bounded
    /// final flush. Idempotent.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Wake the worker wherever it waits: the blocking recv or the
        // pacing sleep.
        let _ = self.wakeup.try_send(());
        let _ = self.stop_signal.try_send(());
        while self.shared.flush_in_progress.load(Ordering::Acquire) {
            thread::sleep(STOP_POLL);
        }
        self.flush(true);
    }

    /// Full teardown: stop, join the worker, close the index.
    pub fn shutdown(&self) {
        self.stop();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        if let Err(err) = self.shared.index.close() {
            tracing::error!(target: "gateway", "index close failed: {err}");
        }
    }
}

impl Drop for IndexModifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}
