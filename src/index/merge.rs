//! Merge tuning and merge-failure suppression.
//!
//! Segment merges run on threads inside tantivy. A failed merge must not
//! tear down the host: the next write cycle re-attempts it, or recovery
//! resets the index. Failures are therefore swallowed here and routed to the
//! logger, at the two points where they can surface: waiting out merging
//! threads on writer close, and the explicit optimize merge.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tantivy::IndexWriter;
use tantivy::merge_policy::LogMergePolicy;

use crate::error::IndexResult;

/// Merge policy for the writer: accumulate `merge_factor` segments before a
/// merge is scheduled.
pub fn merge_policy(merge_factor: usize) -> LogMergePolicy {
    let mut policy = LogMergePolicy::default();
    policy.set_min_num_segments(merge_factor);
    policy
}

/// Close a writer, waiting out its merge threads and swallowing anything
/// they raise.
pub fn close_quietly(writer: IndexWriter) {
    if let Err(err) = writer.wait_merging_threads() {
        tracing::warn!(target: "index", "merge thread failed while closing writer: {err}");
    }
}

/// Run merge work, converting a panic into a logged failure.
pub fn shielded<T>(label: &str, work: impl FnOnce() -> IndexResult<T>) -> IndexResult<Option<T>> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result.map(Some),
        Err(_) => {
            tracing::warn!(target: "index", "{label} panicked; suppressed");
            Ok(None)
        }
    }
}
