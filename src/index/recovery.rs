//! Failure classification and repair for the index directory.
//!
//! The catalog is small and explicit: missing or out-of-range index state
//! means corruption and forces a reset; a foreign process holding the
//! directory lock gets a back-off; two known partial-write artifacts are
//! repaired by renaming them over their canonical files; everything else is
//! logged and the operation dropped. Operations are never requeued; partial
//! progress beats a retry storm.

use std::io::{self, ErrorKind};
use std::time::Duration;
use tantivy::TantivyError;

use crate::error::{IndexError, IndexResult};

use super::handle::SearchIndex;

/// Pause after hitting a directory lock held elsewhere.
pub const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// A transient file left by a partial write, and the canonical file it
/// replaces when recovery rewrites it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientArtifact {
    pub transient: &'static str,
    pub canonical: &'static str,
}

pub const SEGMENTS_ARTIFACT: TransientArtifact = TransientArtifact {
    transient: "segments.new",
    canonical: "segments",
};

pub const DELETEABLE_ARTIFACT: TransientArtifact = TransientArtifact {
    transient: "deleteable.new",
    canonical: "deleteable",
};

/// Action to take for a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Unrecoverable corruption: wipe and recreate the index.
    ResetIndex,
    /// Another process holds the lock: sleep [`RETRY_DELAY`], drop the op.
    BackOff,
    /// Rename the transient artifact over its canonical counterpart.
    ReplaceArtifact(TransientArtifact),
    /// Log and drop the operation.
    Drop,
}

/// The single classifier: every raised condition maps to one enumerated case.
pub fn classify(err: &IndexError) -> Recovery {
    match err {
        IndexError::Corrupt(_) => Recovery::ResetIndex,
        IndexError::LockHeld(_) => Recovery::BackOff,
        IndexError::Io(io_err) => classify_io(io_err),
        IndexError::Tantivy(tantivy_err) => classify_tantivy(tantivy_err),
        IndexError::Directory(_) => Recovery::ResetIndex,
        IndexError::Closed | IndexError::Poisoned => Recovery::Drop,
    }
}

fn classify_tantivy(err: &TantivyError) -> Recovery {
    match err {
        TantivyError::OpenDirectoryError(tantivy::directory::error::OpenDirectoryError::DoesNotExist(_)) => {
            Recovery::ResetIndex
        }
        TantivyError::OpenReadError(tantivy::directory::error::OpenReadError::FileDoesNotExist(_)) => {
            Recovery::ResetIndex
        }
        TantivyError::DataCorruption(_) => Recovery::ResetIndex,
        TantivyError::InvalidArgument(_) => Recovery::ResetIndex,
        TantivyError::LockFailure(_, _) => Recovery::BackOff,
        TantivyError::IoError(io_err) => classify_io(io_err),
        _ => Recovery::Drop,
    }
}

fn classify_io(err: &io::Error) -> Recovery {
    match err.kind() {
        ErrorKind::NotFound => Recovery::ResetIndex,
        ErrorKind::PermissionDenied => Recovery::BackOff,
        _ => {
            let message = err.to_string();
            if message.contains(SEGMENTS_ARTIFACT.transient) {
                Recovery::ReplaceArtifact(SEGMENTS_ARTIFACT)
            } else if message.contains(DELETEABLE_ARTIFACT.transient) {
                Recovery::ReplaceArtifact(DELETEABLE_ARTIFACT)
            } else {
                Recovery::Drop
            }
        }
    }
}

/// Apply the classified action. Repair failures degrade to a log line; the
/// failing operation is dropped either way.
pub fn recover(index: &SearchIndex, err: &IndexError) {
    match classify(err) {
        Recovery::ResetIndex => {
            tracing::error!(target: "recovery", "index corrupted, resetting: {err}");
            if let Err(reset_err) = index.reset() {
                tracing::error!(target: "recovery", "index reset failed: {reset_err}");
            }
        }
        Recovery::BackOff => {
            tracing::warn!(target: "recovery", "index locked elsewhere, backing off: {err}");
            std::thread::sleep(RETRY_DELAY);
        }
        Recovery::ReplaceArtifact(artifact) => {
            tracing::warn!(
                target: "recovery",
                "repairing partial write: {} -> {}",
                artifact.transient,
                artifact.canonical
            );
            if let Err(repair_err) = index.replace_artifact(artifact) {
                tracing::error!(target: "recovery", "artifact repair failed: {repair_err}");
            }
        }
        Recovery::Drop => {
            tracing::error!(target: "recovery", "dropping failed index operation: {err}");
        }
    }
}

/// Rename a transient artifact over its canonical counterpart inside `dir`,
/// replacing the existing file.
pub(super) fn replace_artifact_in(dir: &std::path::Path, artifact: TransientArtifact) -> IndexResult<()> {
    let transient = dir.join(artifact.transient);
    let canonical = dir.join(artifact.canonical);
    // Windows rename refuses to clobber; drop the stale canonical first.
    let _ = std::fs::remove_file(&canonical);
    std::fs::rename(&transient, &canonical)?;
    Ok(())
}
