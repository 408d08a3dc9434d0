//! The single-writer index: handle, recovery, merge tuning, debug sink.

pub mod handle;
pub mod merge;
pub mod recovery;
pub mod sink;

pub use handle::SearchIndex;
pub use recovery::{Recovery, classify};
pub use sink::DebugSink;
