//! Segment index combining mutable buffer + immutable segments
//!
//! Writers tokenize outside the lock, then append to the buffer under the
//! write lock. A flush moves the buffer into a `flushing` slot, encodes and
//! persists it without the lock, then registers the segment and empties the
//! slot in one short write-locked step. Searches hold the read lock while
//! they evaluate the buffer, the slot and a snapshot of the segment set, so
//! a flush is never observed half done.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{FtsError, Result};
use crate::query::{QueryEngine, SearchOutcome, SearchSource};
use crate::tokenizer::{Token, Tokenizer};

use super::buffer::MutableBuffer;
use super::builder::PostingBuilder;
use super::merge::{Merger, SegmentSet};
use super::reader::SegmentReader;
use super::store::SegmentStore;
use super::types::{DocId, Document, SegmentId};
use super::writer::SegmentWriter;

/// Documents tokenized together in one parallel pass
const BATCH_CHUNK: usize = 1_000;

/// Writer-side counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub buffered_docs: u32,
    pub total_docs: u64,
    pub segment_count: usize,
    pub buffered_tokens: u64,
}

/// State guarded by the writer lock
#[derive(Default)]
struct WriterState {
    buffer: MutableBuffer,
    /// Buffer being written out by the current flush
    flushing: Option<Arc<MutableBuffer>>,
    /// External key to internal id, for every indexed document
    keys: HashMap<String, DocId>,
    next_doc_id: DocId,
}

impl WriterState {
    fn buffered(&self) -> impl Iterator<Item = &MutableBuffer> + '_ {
        std::iter::once(&self.buffer).chain(self.flushing.as_deref())
    }

    /// Add a tokenized document unless its key is already known
    fn insert(&mut self, key: &str, tokens: Vec<Token>, doc_len: u32) -> Option<DocId> {
        if self.keys.contains_key(key) {
            return None;
        }
        let doc_id = self.next_doc_id;
        self.next_doc_id += 1;
        self.keys.insert(key.to_string(), doc_id);
        self.buffer.index_document(doc_id, key.to_string(), tokens, doc_len);
        Some(doc_id)
    }
}

/// The main segment-based index
pub struct SegmentIndex {
    config: EngineConfig,
    tokenizer: Tokenizer,
    engine: QueryEngine,
    state: RwLock<WriterState>,
    /// Serializes flushes; taken before `state`, never while holding it
    flush_lock: Mutex<()>,
    segments: Arc<SegmentSet>,
    store: Option<Arc<SegmentStore>>,
    merger: Arc<Merger>,
    sequence: Arc<AtomicU32>,
    generation: u32,
    sealed: AtomicBool,
    read_only: bool,
    pool: rayon::ThreadPool,
}

impl SegmentIndex {
    /// Open an index, loading existing segments from `config.data_dir`
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = match &config.data_dir {
            Some(dir) => Some(Arc::new(SegmentStore::open(dir)?)),
            None => None,
        };
        Self::from_store(config, store, false)
    }

    /// Open an existing directory read-only over memory-mapped segments
    pub fn open_read_only(config: EngineConfig) -> Result<Self> {
        let dir = config.data_dir.clone().ok_or_else(|| {
            FtsError::InvalidRequest("a read-only index needs a data directory".into())
        })?;
        let store = Arc::new(SegmentStore::open_read_only(dir)?);
        Self::from_store(config, Some(store), true)
    }

    fn from_store(
        config: EngineConfig,
        store: Option<Arc<SegmentStore>>,
        read_only: bool,
    ) -> Result<Self> {
        let (segments, generation, sequence) = match &store {
            Some(store) => (
                load_segments(store, read_only)?,
                store.max_generation()? + 1,
                store.sequence_counter(),
            ),
            None => (Vec::new(), 1, Arc::new(AtomicU32::new(1))),
        };

        let mut state = WriterState::default();
        for segment in &segments {
            for (doc_id, _, key) in segment.stats().iter() {
                state.keys.insert(key.to_string(), doc_id);
                state.next_doc_id = state.next_doc_id.max(doc_id + 1);
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(|i| format!("fts-index-{}", i))
            .build()
            .map_err(|e| FtsError::IndexError(format!("failed to build thread pool: {}", e)))?;

        let segments = Arc::new(ArcSwap::from_pointee(segments));
        let builder = PostingBuilder::new(
            config.profile,
            config.dictionary,
            config.roaring_min_postings,
            config.bm25,
        );
        let merger = Arc::new(Merger::new(
            &config.merge,
            builder,
            Arc::clone(&segments),
            store.clone(),
            Arc::clone(&sequence),
        ));

        if !segments.load().is_empty() {
            info!(
                segments = segments.load().len(),
                docs = state.keys.len(),
                read_only,
                "Loaded index"
            );
        }

        Ok(Self {
            tokenizer: Tokenizer::new(&config.tokenizer),
            engine: QueryEngine::new(config.bm25, config.retrieval),
            state: RwLock::new(state),
            flush_lock: Mutex::new(()),
            segments,
            store,
            merger,
            sequence,
            generation,
            sealed: AtomicBool::new(read_only),
            read_only,
            pool,
            config,
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.sealed.load(Ordering::SeqCst) {
            Err(FtsError::Sealed)
        } else {
            Ok(())
        }
    }

    /// Index one document; returns `None` if the key was already indexed
    pub fn add_document(&self, key: &str, text: &str) -> Result<Option<DocId>> {
        self.check_writable()?;
        let (tokens, doc_len) = self.tokenizer.tokens(text);

        let (doc_id, full) = {
            let mut state = self.state.write();
            self.check_writable()?;
            let doc_id = state.insert(key, tokens, doc_len);
            (doc_id, state.buffer.should_flush(self.config.flush_threshold))
        };
        if full {
            self.flush()?;
        }
        Ok(doc_id)
    }

    /// Index a batch of documents, returning how many were new
    ///
    /// `cancel` is checked before every document; `progress` receives
    /// `(processed, total)` after each chunk.
    pub fn add_documents(
        &self,
        docs: &[Document],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<usize> {
        self.check_writable()?;
        let total = docs.len();
        let mut processed = 0usize;
        let mut added = 0usize;

        for chunk in docs.chunks(BATCH_CHUNK) {
            if cancel.is_cancelled() {
                return Err(FtsError::Cancelled { indexed: processed });
            }
            let tokenized: Vec<(Vec<Token>, u32)> = self.pool.install(|| {
                chunk
                    .par_iter()
                    .map(|doc| self.tokenizer.tokens(&doc.text))
                    .collect()
            });

            let mut state = self.state.write();
            self.check_writable()?;
            for (doc, (tokens, doc_len)) in chunk.iter().zip(tokenized) {
                if cancel.is_cancelled() {
                    debug!(processed, "Batch cancelled");
                    return Err(FtsError::Cancelled { indexed: processed });
                }
                if state.insert(&doc.id, tokens, doc_len).is_some() {
                    added += 1;
                }
                processed += 1;
                if state.buffer.should_flush(self.config.flush_threshold) {
                    drop(state);
                    self.flush()?;
                    state = self.state.write();
                }
            }
            drop(state);
            progress(processed, total);
        }
        Ok(added)
    }

    /// Flush buffered documents into a new level-0 segment
    ///
    /// Writers and searches only wait for the handoff into the flushing slot
    /// and for the final registration. On failure the documents go back into
    /// the buffer ahead of anything indexed meanwhile.
    pub fn flush(&self) -> Result<Option<SegmentId>> {
        let _serial = self.flush_lock.lock();
        let pending = {
            let mut state = self.state.write();
            if state.buffer.is_empty() {
                return Ok(None);
            }
            let pending = Arc::new(std::mem::take(&mut state.buffer));
            state.flushing = Some(Arc::clone(&pending));
            pending
        };

        let start = Instant::now();
        match self.write_segment(&pending) {
            Ok((reader, size)) => {
                let id = reader.id();
                let mut state = self.state.write();
                self.segments.rcu(|set| {
                    let mut next = Vec::clone(set);
                    next.push(Arc::clone(&reader));
                    next
                });
                state.flushing = None;
                info!(
                    segment = %id,
                    docs = pending.doc_count(),
                    bytes = size,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Flushed buffer to segment"
                );
                Ok(Some(id))
            }
            Err(e) => {
                let mut state = self.state.write();
                state.flushing = None;
                let mut restored =
                    Arc::try_unwrap(pending).unwrap_or_else(|shared| (*shared).clone());
                restored.append(std::mem::take(&mut state.buffer));
                state.buffer = restored;
                warn!(
                    error = %e,
                    docs = state.buffer.doc_count(),
                    "Flush failed, documents kept in buffer"
                );
                Err(e)
            }
        }
    }

    /// Encode, persist and open a level-0 segment for `buffer`
    fn write_segment(&self, buffer: &MutableBuffer) -> Result<(Arc<SegmentReader>, usize)> {
        let id = SegmentId::new(
            self.generation,
            0,
            self.sequence.fetch_add(1, Ordering::SeqCst),
        );
        let writer = SegmentWriter::new(id, &self.config);
        let bytes = self.pool.install(|| writer.write_buffer(buffer))?;
        let size = bytes.len();

        let reader = match &self.store {
            Some(store) => {
                store.write(id, &bytes)?;
                match SegmentReader::open(bytes.into(), &id.file_name()) {
                    Ok(reader) => reader,
                    Err(e) => {
                        let _ = store.delete(id);
                        return Err(e);
                    }
                }
            }
            None => SegmentReader::open(bytes.into(), &id.file_name())?,
        };
        Ok((Arc::new(reader), size))
    }

    /// Flush and seal the index; later writes fail with `FtsError::Sealed`
    pub fn build(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        {
            let _state = self.state.write();
            self.sealed.store(true, Ordering::SeqCst);
        }
        if let Err(e) = self.flush() {
            self.sealed.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Ranked search over the buffer and every live segment
    pub fn search(&self, query: &str, limit: usize, offset: usize) -> Result<SearchOutcome> {
        let terms = self.tokenizer.tokenize_query(query);
        if terms.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let state = self.state.read();
        let segments = self.segments.load_full();
        let mut sources: Vec<&dyn SearchSource> = Vec::with_capacity(segments.len() + 2);
        for buffer in state.buffered() {
            sources.push(buffer);
        }
        for segment in segments.iter() {
            sources.push(segment.as_ref());
        }
        self.engine.search(&terms, &sources, limit, offset)
    }

    /// Number of distinct documents
    pub fn count(&self) -> u64 {
        self.state.read().keys.len() as u64
    }

    pub fn stats(&self) -> WriterStats {
        let state = self.state.read();
        WriterStats {
            buffered_docs: state.buffered().map(|b| b.doc_count()).sum(),
            total_docs: state.keys.len() as u64,
            segment_count: self.segments.load().len(),
            buffered_tokens: state.buffered().map(|b| b.token_count()).sum(),
        }
    }

    /// Distinct terms, counted once per buffer or segment holding them
    pub fn term_count(&self) -> u64 {
        let state = self.state.read();
        let sealed: u64 = self.segments.load().iter().map(|s| s.term_count() as u64).sum();
        let buffered: usize = state.buffered().map(|b| b.term_count()).sum();
        buffered as u64 + sealed
    }

    /// Approximate heap usage in bytes
    pub fn memory_bytes(&self) -> u64 {
        let state = self.state.read();
        let keys: usize = state
            .keys
            .keys()
            .map(|k| k.len() + std::mem::size_of::<(String, DocId)>())
            .sum();
        let sealed: usize = self.segments.load().iter().map(|s| s.memory_bytes()).sum();
        let buffered: usize = state.buffered().map(|b| b.size_bytes()).sum();
        (buffered + keys + sealed) as u64
    }

    /// Run one merge if the policy finds one
    pub fn merge_once(&self) -> Result<Option<SegmentId>> {
        if self.read_only {
            return Ok(None);
        }
        self.merger.merge_once()
    }

    /// Merge until no level is full
    pub fn merge_all(&self) -> Result<usize> {
        if self.read_only {
            return Ok(0);
        }
        self.merger.merge_all()
    }

    pub fn merger(&self) -> Arc<Merger> {
        Arc::clone(&self.merger)
    }

    /// Snapshot of the live segments
    pub fn segments(&self) -> Arc<Vec<Arc<SegmentReader>>> {
        self.segments.load_full()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.load().len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Arc<SegmentStore>> {
        self.store.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Open every segment in the store, skipping sources of a finished merge
///
/// A crash between registering a merge target and deleting its sources
/// leaves both on disk; the sources are recognized because a higher-level
/// segment already holds their documents.
fn load_segments(store: &SegmentStore, mapped: bool) -> Result<Vec<Arc<SegmentReader>>> {
    let mut segments = Vec::new();
    for id in store.list()? {
        let reader = if mapped { store.map(id)? } else { store.read(id)? };
        segments.push(Arc::new(reader));
    }

    let superseded = |segment: &SegmentReader| {
        let Some(&first) = segment.stats().doc_ids().first() else {
            return false;
        };
        segments.iter().any(|other| {
            other.id().level > segment.id().level
                && other.stats().get_doc_length(first).is_some()
        })
    };
    let (stale, live): (Vec<_>, Vec<_>) = segments
        .iter()
        .cloned()
        .partition(|segment| superseded(segment));

    for segment in stale {
        warn!(segment = %segment.id(), "Ignoring segment already merged into a higher level");
        if !mapped {
            store.delete(segment.id())?;
        }
    }
    Ok(live)
}
