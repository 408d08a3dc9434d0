//! Pending index mutations and their drain priorities.

use std::cmp::Ordering;
use std::time::Instant;

use crate::document::{DocTerm, ItemDocument};

/// One pending index mutation, with typed payload per kind.
#[derive(Debug, Clone)]
pub enum IndexOperation {
    /// Merge all segments into one. Longest operation; the drain loop
    /// acknowledges it without executing (see worker).
    Optimize,
    /// Remove every item of a feed. Runs before pending item adds and
    /// deletes so a removed feed is not re-populated from the queue.
    DeleteFeed(DocTerm),
    AddDocument {
        doc: ItemDocument,
        culture: Option<String>,
    },
    AddDocuments {
        docs: Vec<ItemDocument>,
        culture: Option<String>,
    },
    /// Remove items by key. Lowest priority, so within a batch it follows
    /// the adds it may target and churn cancels out.
    DeleteDocuments(DocTerm),
}

impl IndexOperation {
    /// Drain priority; lower drains sooner.
    pub fn priority(&self) -> u8 {
        match self {
            IndexOperation::Optimize => 1,
            IndexOperation::DeleteFeed(_) => 2,
            IndexOperation::AddDocument { .. } => 10,
            IndexOperation::AddDocuments { .. } => 11,
            IndexOperation::DeleteDocuments(_) => 50,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            IndexOperation::Optimize => OperationKind::Optimize,
            IndexOperation::DeleteFeed(_) => OperationKind::DeleteFeed,
            IndexOperation::AddDocument { .. } => OperationKind::AddDocument,
            IndexOperation::AddDocuments { .. } => OperationKind::AddDocuments,
            IndexOperation::DeleteDocuments(_) => OperationKind::DeleteDocuments,
        }
    }
}

/// Discriminant of [`IndexOperation`], carried by completion events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Optimize,
    DeleteFeed,
    AddDocument,
    AddDocuments,
    DeleteDocuments,
}

/// Queue entry. Immutable once enqueued; `seq` keeps FIFO order within a
/// priority band.
#[derive(Debug)]
pub struct PendingOperation {
    pub op: IndexOperation,
    pub seq: u64,
    pub enqueued_at: Instant,
}

impl PartialEq for PendingOperation {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingOperation {}

impl PartialOrd for PendingOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        self.op
            .priority()
            .cmp(&other.op.priority())
            .then(self.seq.cmp(&other.seq))
    }
}

/// What happened to a drained operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Executed against the index.
    Completed,
    /// Execution failed; recovery ran and the operation was dropped.
    Failed,
    /// Dequeued but deliberately not executed (optimize during a drain).
    Skipped,
}

/// Completion event, raised exactly once per drained operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedOperation {
    pub kind: OperationKind,
    pub outcome: Outcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(op: IndexOperation, seq: u64) -> PendingOperation {
        PendingOperation {
            op,
            seq,
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn priorities_are_fixed() {
        assert_eq!(IndexOperation::Optimize.priority(), 1);
        assert_eq!(IndexOperation::DeleteFeed(DocTerm::feed("f")).priority(), 2);
        assert_eq!(
            IndexOperation::AddDocument {
                doc: ItemDocument::new("i", "f", "t", "b"),
                culture: None
            }
            .priority(),
            10
        );
        assert_eq!(
            IndexOperation::AddDocuments {
                docs: vec![],
                culture: None
            }
            .priority(),
            11
        );
        assert_eq!(
            IndexOperation::DeleteDocuments(DocTerm::item("i")).priority(),
            50
        );
    }

    #[test]
    fn ordering_is_priority_then_seq() {
        let early_add = pending(
            IndexOperation::AddDocument {
                doc: ItemDocument::new("a", "f", "t", "b"),
                culture: None,
            },
            1,
        );
        let late_add = pending(
            IndexOperation::AddDocument {
                doc: ItemDocument::new("b", "f", "t", "b"),
                culture: None,
            },
            2,
        );
        let feed_delete = pending(IndexOperation::DeleteFeed(DocTerm::feed("f")), 3);

        assert!(feed_delete < early_add);
        assert!(early_add < late_add);
    }
}
