//! The single-writer index handle.
//!
//! Wraps one tantivy index session: open/close, add, delete-by-term,
//! optimize, flush, reset. All mutations go through the mutator lock; the
//! `open` flag lives under its own lock so `assure_open` and `reset` cannot
//! race. The writer is created lazily on the first mutation after open and
//! carries the merge policy and the buffered-docs commit threshold.

use std::io::Write as _;
use std::sync::Mutex;
use tantivy::collector::Count;
use tantivy::query::TermQuery;
use tantivy::schema::{IndexRecordOption, Schema};
use tantivy::{Index, IndexReader, IndexWriter, IndexSettings, ReloadPolicy, Term};

use crate::analysis::AnalyzerRegistry;
use crate::config::{IndexLocation, Settings, Tuning};
use crate::document::{DocTerm, ItemDocument, ItemSchema};
use crate::error::{IndexError, IndexResult};

use super::merge;
use super::recovery::{self, TransientArtifact};
use super::sink::DebugSink;

/// Writer heap, generous enough that the buffered-docs threshold decides
/// commit points rather than memory pressure.
const WRITER_HEAP_BYTES: usize = 50_000_000;

struct Backend {
    index: Index,
    reader: IndexReader,
    writer: Option<IndexWriter>,
    /// Mutations buffered since the last commit.
    buffered: usize,
}

/// Handle over the on-disk or in-RAM index. One live writer at most; every
/// caller serializes on the mutator lock.
pub struct SearchIndex {
    location: IndexLocation,
    tuning: Tuning,
    analyzers: AnalyzerRegistry,
    schema: Schema,
    fields: ItemSchema,
    /// Open-lock: guards the `open` flag only.
    open: Mutex<bool>,
    /// Mutator lock: guards the index, reader, and writer.
    backend: Mutex<Option<Backend>>,
    /// Keeps a RAM index alive across close/init cycles.
    ram: Mutex<Option<Index>>,
    sink: Mutex<DebugSink>,
    /// Buffered-batch commits performed so far.
    commits: std::sync::atomic::AtomicU64,
    #[cfg(test)]
    faults: Mutex<std::collections::VecDeque<Fault>>,
    #[cfg(test)]
    mutators_inside: std::sync::atomic::AtomicUsize,
}

impl SearchIndex {
    /// Open (or create) the index described by `settings`.
    pub fn open(settings: &Settings) -> IndexResult<Self> {
        let (schema, fields) = ItemSchema::build();
        let handle = Self {
            location: settings.index.clone(),
            tuning: settings.tuning.clone(),
            analyzers: AnalyzerRegistry::new(&settings.default_language),
            schema,
            fields,
            open: Mutex::new(false),
            backend: Mutex::new(None),
            ram: Mutex::new(None),
            sink: Mutex::new(DebugSink::new()),
            commits: std::sync::atomic::AtomicU64::new(0),
            #[cfg(test)]
            faults: Mutex::new(std::collections::VecDeque::new()),
            #[cfg(test)]
            mutators_inside: std::sync::atomic::AtomicUsize::new(0),
        };
        handle.init()?;
        Ok(handle)
    }

    /// Open a writer session at the configured location. Creates the index
    /// when none exists, opens in append mode otherwise. Safe to call on a
    /// freshly reset directory; a no-op when already open.
    pub fn init(&self) -> IndexResult<()> {
        let mut open = lock(&self.open);
        if *open {
            return Ok(());
        }

        let index = self.open_or_create_index()?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        *lock(&self.backend) = Some(Backend {
            index,
            reader,
            writer: None,
            buffered: 0,
        });
        *open = true;
        Ok(())
    }

    fn open_or_create_index(&self) -> IndexResult<Index> {
        match &self.location {
            IndexLocation::Disk { path } => {
                std::fs::create_dir_all(path)?;
                let index = if path.join("meta.json").exists() {
                    self.note(format_args!("opening index at {}", path.display()));
                    Index::open_in_dir(path)?
                } else {
                    self.note(format_args!("creating index at {}", path.display()));
                    let dir = tantivy::directory::MmapDirectory::open(path)?;
                    Index::create(dir, self.schema.clone(), IndexSettings::default())?
                };
                Ok(index)
            }
            IndexLocation::Memory => {
                let mut ram = lock(&self.ram);
                if let Some(index) = ram.as_ref() {
                    return Ok(index.clone());
                }
                self.note(format_args!("creating index in RAM"));
                let index = Index::create_in_ram(self.schema.clone());
                *ram = Some(index.clone());
                Ok(index)
            }
        }
    }

    /// Fail with [`IndexError::Closed`] unless a writer session is live.
    pub fn assure_open(&self) -> IndexResult<()> {
        if *lock(&self.open) {
            Ok(())
        } else {
            Err(IndexError::Closed)
        }
    }

    /// Append one document, analyzed with the culture's analyzer when given,
    /// else the default.
    pub fn add(&self, doc: ItemDocument, culture: Option<&str>) -> IndexResult<()> {
        self.assure_open()?;
        let mut guard = lock(&self.backend);
        let backend = guard.as_mut().ok_or(IndexError::Closed)?;
        #[cfg(test)]
        let _probe = self.enter_mutator();
        #[cfg(test)]
        self.take_fault()?;

        let mut analyzer = self.analyzers.analyzer_for(culture);
        self.add_locked(backend, doc, &mut analyzer)?;
        self.maybe_commit(backend)
    }

    /// Append a batch of documents; the culture analyzer is resolved once.
    pub fn add_many(&self, docs: Vec<ItemDocument>, culture: Option<&str>) -> IndexResult<()> {
        self.assure_open()?;
        let mut guard = lock(&self.backend);
        let backend = guard.as_mut().ok_or(IndexError::Closed)?;
        #[cfg(test)]
        let _probe = self.enter_mutator();
        #[cfg(test)]
        self.take_fault()?;

        let mut analyzer = self.analyzers.analyzer_for(culture);
        for doc in docs {
            self.add_locked(backend, doc, &mut analyzer)?;
        }
        self.maybe_commit(backend)
    }

    fn add_locked(
        &self,
        backend: &mut Backend,
        doc: ItemDocument,
        analyzer: &mut tantivy::tokenizer::TextAnalyzer,
    ) -> IndexResult<()> {
        let title = AnalyzerRegistry::pre_tokenize(analyzer, &doc.title);
        let body = AnalyzerRegistry::pre_tokenize(analyzer, &doc.body);
        let tantivy_doc = doc.into_tantivy(&self.fields, title, body);

        self.writer(backend)?.add_document(tantivy_doc)?;
        backend.buffered += 1;
        Ok(())
    }

    /// Delete all documents whose key field matches the term.
    pub fn delete(&self, term: &DocTerm) -> IndexResult<()> {
        self.assure_open()?;
        let mut guard = lock(&self.backend);
        let backend = guard.as_mut().ok_or(IndexError::Closed)?;
        #[cfg(test)]
        let _probe = self.enter_mutator();
        #[cfg(test)]
        self.take_fault()?;

        let tantivy_term = Term::from_field_text(term.field_in(&self.fields), &term.value);
        self.writer(backend)?.delete_term(tantivy_term);
        backend.buffered += 1;
        self.maybe_commit(backend)
    }

    /// Merge all segments into one. May be long-running; merge failures and
    /// panics are suppressed.
    pub fn optimize(&self) -> IndexResult<()> {
        self.assure_open()?;
        let mut guard = lock(&self.backend);
        let backend = guard.as_mut().ok_or(IndexError::Closed)?;

        // Segments must be committed before they are mergeable.
        self.commit_locked(backend)?;

        let segment_ids = backend.index.searchable_segment_ids()?;
        if segment_ids.len() > 1 {
            self.note(format_args!("optimizing {} segments", segment_ids.len()));
            let writer = self.writer(backend)?;
            merge::shielded("optimize merge", || {
                writer.merge(&segment_ids).wait()?;
                Ok(())
            })?;
            backend.reader.reload()?;
        }
        Ok(())
    }

    /// Commit buffered mutations so readers see them. Called by the worker at
    /// drain boundaries.
    pub fn commit(&self) -> IndexResult<()> {
        self.assure_open()?;
        let mut guard = lock(&self.backend);
        let backend = guard.as_mut().ok_or(IndexError::Closed)?;
        self.commit_locked(backend)
    }

    /// Close the current writer to force on-disk visibility. Unless
    /// `close_writer_only`, a fresh writer is opened afterwards.
    pub fn flush(&self, close_writer_only: bool) -> IndexResult<()> {
        self.assure_open()?;
        let mut guard = lock(&self.backend);
        let backend = guard.as_mut().ok_or(IndexError::Closed)?;

        self.commit_locked(backend)?;
        if let Some(writer) = backend.writer.take() {
            merge::close_quietly(writer);
        }
        if !close_writer_only {
            self.writer(backend)?;
        }
        Ok(())
    }

    /// Close, wipe the backing directory (disk only), and reopen empty.
    ///
    /// Directory mutation happens outside the open-lock so filesystem state
    /// and open state cannot deadlock against each other.
    pub fn reset(&self) -> IndexResult<()> {
        self.close()?;

        match &self.location {
            IndexLocation::Disk { path } => {
                match std::fs::remove_dir_all(path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                std::fs::create_dir_all(path)?;
            }
            IndexLocation::Memory => {
                *lock(&self.ram) = None;
            }
        }

        self.note(format_args!("index reset"));
        self.init()
    }

    /// Close the writer and mark the index not open. Idempotent.
    pub fn close(&self) -> IndexResult<()> {
        let mut open = lock(&self.open);
        if !*open {
            return Ok(());
        }

        if let Some(mut backend) = lock(&self.backend).take() {
            if let Err(err) = self.commit_locked(&mut backend) {
                tracing::error!(target: "index", "commit on close failed: {err}");
            }
            if let Some(writer) = backend.writer.take() {
                merge::close_quietly(writer);
            }
        }

        *open = false;
        self.note(format_args!("index closed"));
        Ok(())
    }

    /// Number of live documents visible to readers.
    pub fn num_docs(&self) -> IndexResult<u64> {
        self.assure_open()?;
        let guard = lock(&self.backend);
        let backend = guard.as_ref().ok_or(IndexError::Closed)?;
        Ok(backend.reader.searcher().num_docs())
    }

    /// Count documents matching a key term. A verification probe, not a
    /// search API.
    pub fn count_term(&self, term: &DocTerm) -> IndexResult<u64> {
        self.assure_open()?;
        let guard = lock(&self.backend);
        let backend = guard.as_ref().ok_or(IndexError::Closed)?;

        let tantivy_term = Term::from_field_text(term.field_in(&self.fields), &term.value);
        let query = TermQuery::new(tantivy_term, IndexRecordOption::Basic);
        let count = backend.reader.searcher().search(&query, &Count)?;
        Ok(count as u64)
    }

    /// Buffered-batch commits performed so far.
    pub fn num_commits(&self) -> u64 {
        self.commits.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Rename a partial-write artifact over its canonical file. No-op for a
    /// RAM index.
    pub fn replace_artifact(&self, artifact: TransientArtifact) -> IndexResult<()> {
        match &self.location {
            IndexLocation::Disk { path } => recovery::replace_artifact_in(path, artifact),
            IndexLocation::Memory => Ok(()),
        }
    }

    fn writer<'b>(&self, backend: &'b mut Backend) -> IndexResult<&'b mut IndexWriter> {
        if backend.writer.is_none() {
            let writer: IndexWriter = backend.index.writer(WRITER_HEAP_BYTES)?;
            writer.set_merge_policy(Box::new(merge::merge_policy(self.tuning.merge_factor)));
            self.note(format_args!("writer opened"));
            backend.writer = Some(writer);
        }
        backend.writer.as_mut().ok_or(IndexError::Closed)
    }

    fn maybe_commit(&self, backend: &mut Backend) -> IndexResult<()> {
        if backend.buffered >= self.tuning.buffered_docs {
            self.commit_locked(backend)?;
        }
        Ok(())
    }

    fn commit_locked(&self, backend: &mut Backend) -> IndexResult<()> {
        if backend.buffered == 0 {
            return Ok(());
        }
        if let Some(writer) = backend.writer.as_mut() {
            writer.commit()?;
            backend.reader.reload()?;
            self.commits
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            self.note(format_args!("committed {} buffered mutations", backend.buffered));
            backend.buffered = 0;
        }
        Ok(())
    }

    fn note(&self, args: std::fmt::Arguments<'_>) {
        let mut sink = lock(&self.sink);
        let _ = writeln!(sink, "{args}");
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&self, fault: Fault) {
        lock(&self.faults).push_back(fault);
    }

    #[cfg(test)]
    fn take_fault(&self) -> IndexResult<()> {
        use std::io::{Error, ErrorKind};
        let Some(fault) = lock(&self.faults).pop_front() else {
            return Ok(());
        };
        Err(match fault {
            Fault::NotFound => {
                Error::new(ErrorKind::NotFound, "segments file missing").into()
            }
            Fault::AccessDenied => {
                Error::new(ErrorKind::PermissionDenied, "index locked by another process").into()
            }
            Fault::SegmentsNew => {
                Error::other("failed to read segments.new").into()
            }
            Fault::DeleteableNew => {
                Error::other("failed to read deleteable.new").into()
            }
            Fault::OutOfRange => {
                IndexError::Tantivy(tantivy::TantivyError::InvalidArgument(
                    "doc id out of range".to_string(),
                ))
            }
        })
    }

    #[cfg(test)]
    fn enter_mutator(&self) -> MutatorProbe<'_> {
        use std::sync::atomic::Ordering;
        let previous = self.mutators_inside.fetch_add(1, Ordering::SeqCst);
        assert_eq!(previous, 0, "two threads inside the mutator region");
        MutatorProbe(&self.mutators_inside)
    }
}

/// Injectable failures for recovery tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) enum Fault {
    NotFound,
    AccessDenied,
    SegmentsNew,
    DeleteableNew,
    OutOfRange,
}

#[cfg(test)]
struct MutatorProbe<'a>(&'a std::sync::atomic::AtomicUsize);

#[cfg(test)]
impl Drop for MutatorProbe<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tempfile::TempDir;

    fn item(id: &str, feed: &str) -> ItemDocument {
        ItemDocument::new(id, feed, format!("title {id}"), format!("body of {id}"))
    }

    fn ram_index() -> SearchIndex {
        SearchIndex::open(&Settings::in_memory()).unwrap()
    }

    #[test]
    fn fresh_index_is_empty() {
        let index = ram_index();
        assert_eq!(index.num_docs().unwrap(), 0);
    }

    #[test]
    fn add_commit_makes_document_visible() {
        let index = ram_index();
        index.add(item("a", "feed-1"), None).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 1);
        assert_eq!(index.count_term(&DocTerm::item("a")).unwrap(), 1);
    }

    #[test]
    fn add_many_resolves_culture_once() {
        let index = ram_index();
        let docs = (0..5).map(|i| item(&format!("i{i}"), "f")).collect();
        index.add_many(docs, Some("de-DE")).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 5);
    }

    #[test]
    fn delete_by_item_and_by_feed() {
        let index = ram_index();
        index.add(item("a", "feed-1"), None).unwrap();
        index.add(item("b", "feed-1"), None).unwrap();
        index.add(item("c", "feed-2"), None).unwrap();
        index.commit().unwrap();

        index.delete(&DocTerm::item("a")).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 2);

        index.delete(&DocTerm::feed("feed-1")).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 1);
        assert_eq!(index.count_term(&DocTerm::item("c")).unwrap(), 1);
    }

    #[test]
    fn buffered_docs_threshold_autocommits() {
        let mut settings = Settings::in_memory();
        settings.tuning.buffered_docs = 10;
        let index = SearchIndex::open(&settings).unwrap();

        for i in 0..9 {
            index.add(item(&format!("i{i}"), "f"), None).unwrap();
        }
        // Below threshold: nothing visible yet.
        assert_eq!(index.num_docs().unwrap(), 0);

        index.add(item("i9", "f"), None).unwrap();
        // Tenth mutation crossed the threshold and committed.
        assert_eq!(index.num_docs().unwrap(), 10);
    }

    #[test]
    fn flush_without_close_reopens_writer_and_no_dedup() {
        let index = ram_index();
        index.add(item("a", "f"), None).unwrap();
        index.flush(false).unwrap();
        index.add(item("a", "f"), None).unwrap();
        index.flush(false).unwrap();
        // No dedup contract at this layer: two hits for the same key.
        assert_eq!(index.count_term(&DocTerm::item("a")).unwrap(), 2);
    }

    #[test]
    fn close_is_idempotent_and_closed_errors() {
        let index = ram_index();
        index.close().unwrap();
        index.close().unwrap();
        assert!(matches!(index.num_docs(), Err(IndexError::Closed)));
        assert!(matches!(
            index.add(item("a", "f"), None),
            Err(IndexError::Closed)
        ));
        assert!(matches!(index.assure_open(), Err(IndexError::Closed)));
    }

    #[test]
    fn close_then_init_preserves_documents_on_disk() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::at_path(dir.path());
        let index = SearchIndex::open(&settings).unwrap();

        index.add(item("a", "f"), None).unwrap();
        index.commit().unwrap();
        index.close().unwrap();
        index.init().unwrap();
        assert_eq!(index.num_docs().unwrap(), 1);
    }

    #[test]
    fn reset_empties_disk_index() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::at_path(dir.path());
        let index = SearchIndex::open(&settings).unwrap();

        index.add(item("a", "f"), None).unwrap();
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 1);

        index.reset().unwrap();
        assert_eq!(index.num_docs().unwrap(), 0);

        // Second reset is a no-op beyond recreating the directory.
        index.reset().unwrap();
        assert_eq!(index.num_docs().unwrap(), 0);
    }

    #[test]
    fn reset_empties_ram_index() {
        let index = ram_index();
        index.add(item("a", "f"), None).unwrap();
        index.commit().unwrap();
        index.reset().unwrap();
        assert_eq!(index.num_docs().unwrap(), 0);
    }

    #[test]
    fn optimize_merges_to_one_segment() {
        let index = ram_index();
        for i in 0..3 {
            index.add(item(&format!("i{i}"), "f"), None).unwrap();
            index.flush(false).unwrap();
        }
        index.optimize().unwrap();
        assert_eq!(index.num_docs().unwrap(), 3);
        assert_eq!(index.count_term(&DocTerm::item("i0")).unwrap(), 1);
    }

    #[test]
    fn mutator_region_is_exclusive() {
        use std::sync::Arc;
        let index = Arc::new(ram_index());
        let mut handles = Vec::new();
        for t in 0..4 {
            let index = Arc::clone(&index);
            handles.push(std::thread::spawn(move || {
                for i in 0..25 {
                    index.add(item(&format!("{t}-{i}"), "f"), None).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 100);
    }
}
