use tantivy::TantivyError;
use tantivy::directory::error::OpenDirectoryError;
use thiserror::Error;

/// Errors surfaced by the index handle and the gateway.
///
/// `Closed` is a contract error and reaches the caller synchronously.
/// Everything else is environmental and is routed through the recovery
/// classifier before an operation is dropped.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index is closed")]
    Closed,

    #[error("tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("directory error: {0}")]
    Directory(#[from] OpenDirectoryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index corrupted: {0}")]
    Corrupt(String),

    #[error("index locked by another process: {0}")]
    LockHeld(String),

    #[error("lock poisoned")]
    Poisoned,
}

pub type IndexResult<T> = Result<T, IndexError>;
