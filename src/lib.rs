//! feedsearch: serializing single-writer gateway over a tantivy index of
//! feed-item contents.
//!
//! Producers enqueue mutations on a priority queue; a dedicated worker
//! drains them in bounded batches against the one writer the index permits,
//! recovering from a small catalog of environmental failures.

pub mod analysis;
pub mod config;
pub mod document;
pub mod error;
pub mod gateway;
pub mod index;
pub mod logging;
pub mod ops;
pub mod queue;
mod worker;

pub use config::{IndexLocation, Settings};
pub use document::{DocField, DocTerm, ItemDocument};
pub use error::{IndexError, IndexResult};
pub use gateway::IndexModifier;
pub use index::SearchIndex;
pub use ops::{FinishedOperation, IndexOperation, OperationKind, Outcome};
