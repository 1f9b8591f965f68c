//! Tiered merge policy and background merger
//!
//! Flushed segments start at level 0. Once a level holds
//! `segments_per_level` segments, the oldest of them are merged into one
//! segment at the next level. Segments at the last level are never merged.
//!
//! A merge registers its target before any source file is removed, so a
//! search always sees every document exactly once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::error::Result;

use super::builder::PostingBuilder;
use super::reader::SegmentReader;
use super::store::SegmentStore;
use super::types::SegmentId;
use super::writer::SegmentWriter;

/// Live segment set shared between writers, searchers and the merger
pub type SegmentSet = ArcSwap<Vec<Arc<SegmentReader>>>;

/// One merge selected by the policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTask {
    pub source_level: u8,
    /// Source segments, oldest first
    pub segment_ids: Vec<SegmentId>,
    pub target_level: u8,
}

/// Level-based tiered merge policy
#[derive(Clone, Debug)]
pub struct TieredMergePolicy {
    segments_per_level: usize,
    max_levels: u8,
}

impl TieredMergePolicy {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            segments_per_level: config.segments_per_level.max(2),
            max_levels: config.max_levels.max(1),
        }
    }

    /// Pick the lowest level that is full
    pub fn find_merge(&self, segments: &[SegmentId]) -> Option<MergeTask> {
        for level in 0..self.max_levels.saturating_sub(1) {
            let mut at_level: Vec<SegmentId> =
                segments.iter().copied().filter(|id| id.level == level).collect();
            if at_level.len() >= self.segments_per_level {
                at_level.sort();
                at_level.truncate(self.segments_per_level);
                return Some(MergeTask {
                    source_level: level,
                    segment_ids: at_level,
                    target_level: level + 1,
                });
            }
        }
        None
    }
}

/// Executes merges against a shared segment set
pub struct Merger {
    policy: TieredMergePolicy,
    builder: PostingBuilder,
    segments: Arc<SegmentSet>,
    store: Option<Arc<SegmentStore>>,
    sequence: Arc<AtomicU32>,
    /// Serializes merges started from different threads
    running: Mutex<()>,
}

impl Merger {
    pub fn new(
        config: &MergeConfig,
        builder: PostingBuilder,
        segments: Arc<SegmentSet>,
        store: Option<Arc<SegmentStore>>,
        sequence: Arc<AtomicU32>,
    ) -> Self {
        Self {
            policy: TieredMergePolicy::new(config),
            builder,
            segments,
            store,
            sequence,
            running: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &TieredMergePolicy {
        &self.policy
    }

    /// Run at most one merge; returns the new segment if one was produced
    pub fn merge_once(&self) -> Result<Option<SegmentId>> {
        let _guard = self.running.lock();

        let current = self.segments.load_full();
        let ids: Vec<SegmentId> = current.iter().map(|s| s.id()).collect();
        let Some(task) = self.policy.find_merge(&ids) else {
            return Ok(None);
        };

        let start = Instant::now();
        let sources: Vec<Arc<SegmentReader>> = current
            .iter()
            .filter(|s| task.segment_ids.contains(&s.id()))
            .cloned()
            .collect();
        let generation = sources.iter().map(|s| s.id().generation).max().unwrap_or(0);
        let target_id = SegmentId::new(
            generation,
            task.target_level,
            self.sequence.fetch_add(1, Ordering::SeqCst),
        );

        debug!(
            target = %target_id,
            sources = sources.len(),
            level = task.source_level,
            "Merging segments"
        );
        let bytes = SegmentWriter::with_builder(target_id, self.builder.clone())
            .write_merged(&sources)?;

        let target = match &self.store {
            Some(store) => {
                store.write(target_id, &bytes)?;
                let opened = if sources.iter().all(|s| s.is_mapped()) {
                    store.map(target_id)
                } else {
                    SegmentReader::open(bytes.into(), &target_id.file_name())
                };
                match opened {
                    Ok(reader) => reader,
                    Err(e) => {
                        let _ = store.delete(target_id);
                        return Err(e);
                    }
                }
            }
            None => SegmentReader::open(bytes.into(), &target_id.file_name())?,
        };
        let target = Arc::new(target);

        self.segments.rcu(|set| {
            let mut next: Vec<Arc<SegmentReader>> = set
                .iter()
                .filter(|s| !task.segment_ids.contains(&s.id()))
                .cloned()
                .collect();
            next.push(Arc::clone(&target));
            next.sort_by_key(|s| s.id());
            next
        });

        if let Some(store) = &self.store {
            for id in &task.segment_ids {
                if let Err(e) = store.delete(*id) {
                    warn!(segment = %id, error = %e, "Failed to delete merged segment");
                }
            }
        }

        info!(
            target = %target_id,
            docs = target.doc_count(),
            sources = task.segment_ids.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Merged segments"
        );
        Ok(Some(target_id))
    }

    /// Merge until the policy finds nothing to do
    pub fn merge_all(&self) -> Result<usize> {
        let mut merges = 0;
        while self.merge_once()?.is_some() {
            merges += 1;
        }
        Ok(merges)
    }
}

/// Background thread polling the merger
pub struct BackgroundMerger {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundMerger {
    /// Spawn the merge thread
    pub fn start(merger: Arc<Merger>, poll_interval: Duration) -> Result<Self> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("fts-merger".into())
            .spawn(move || {
                debug!(?poll_interval, "Background merger started");
                loop {
                    match merger.merge_once() {
                        Ok(Some(_)) => {
                            // More work may be pending; only yield to a stop request
                            if stop_rx.try_recv().is_ok() {
                                break;
                            }
                            continue;
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "Segment merge failed, will retry"),
                    }

                    match stop_rx.recv_timeout(poll_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Background merger stopped");
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    /// Signal the thread and wait for it; an in-flight merge completes first
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.try_send(());
            if handle.join().is_err() {
                warn!("Background merger panicked");
            }
        }
    }
}

impl Drop for BackgroundMerger {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::segment::buffer::MutableBuffer;
    use crate::tokenizer::Tokenizer;
    use tempfile::TempDir;

    fn ids(layout: &[(u8, u32)]) -> Vec<SegmentId> {
        layout
            .iter()
            .map(|&(level, seq)| SegmentId::new(1, level, seq))
            .collect()
    }

    #[test]
    fn test_policy_waits_for_full_level() {
        let policy = TieredMergePolicy::new(&MergeConfig::default());
        assert_eq!(policy.find_merge(&ids(&[(0, 1), (0, 2), (0, 3)])), None);

        let task = policy
            .find_merge(&ids(&[(0, 5), (0, 2), (0, 9), (0, 1), (0, 7)]))
            .unwrap();
        assert_eq!(task.source_level, 0);
        assert_eq!(task.target_level, 1);
        // Oldest four by sequence
        assert_eq!(task.segment_ids, ids(&[(0, 1), (0, 2), (0, 5), (0, 7)]));
    }

    #[test]
    fn test_policy_prefers_lowest_level_and_stops_at_last() {
        let policy = TieredMergePolicy::new(&MergeConfig::default());
        let mut segments = ids(&[(1, 1), (1, 2), (1, 3), (1, 4)]);
        segments.extend(ids(&[(0, 5), (0, 6), (0, 7), (0, 8)]));
        assert_eq!(policy.find_merge(&segments).unwrap().source_level, 0);

        // Level 3 is the last of four levels
        let last = ids(&[(3, 1), (3, 2), (3, 3), (3, 4), (3, 5)]);
        assert_eq!(policy.find_merge(&last), None);
    }

    fn segment_bytes(config: &EngineConfig, id: SegmentId, doc_id: u32) -> Vec<u8> {
        let tokenizer = Tokenizer::new(&config.tokenizer);
        let mut buffer = MutableBuffer::new();
        let (tokens, len) = tokenizer.tokens(&format!("common unique{}", doc_id));
        buffer.index_document(doc_id, doc_id.to_string(), tokens, len);
        SegmentWriter::new(id, config).write_buffer(&buffer).unwrap()
    }

    fn merger_fixture(
        config: &EngineConfig,
        store: Option<Arc<SegmentStore>>,
        count: u32,
    ) -> (Merger, Arc<SegmentSet>) {
        let sequence = Arc::new(AtomicU32::new(1));
        let mut segments = Vec::new();
        for doc_id in 0..count {
            let id = SegmentId::new(1, 0, sequence.fetch_add(1, Ordering::SeqCst));
            let bytes = segment_bytes(config, id, doc_id);
            if let Some(store) = &store {
                store.write(id, &bytes).unwrap();
            }
            segments.push(Arc::new(SegmentReader::open(bytes.into(), "test").unwrap()));
        }
        let set = Arc::new(ArcSwap::from_pointee(segments));
        let builder = PostingBuilder::new(
            config.profile,
            config.dictionary,
            config.roaring_min_postings,
            config.bm25,
        );
        let merger = Merger::new(&config.merge, builder, Arc::clone(&set), store, sequence);
        (merger, set)
    }

    #[test]
    fn test_merge_once_replaces_sources() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SegmentStore::open(dir.path()).unwrap());
        let config = EngineConfig::default();
        let (merger, set) = merger_fixture(&config, Some(Arc::clone(&store)), 5);

        let target = merger.merge_once().unwrap().unwrap();
        assert_eq!(target.level, 1);

        let segments = set.load();
        assert_eq!(segments.len(), 2);
        let total: u32 = segments.iter().map(|s| s.doc_count()).sum();
        assert_eq!(total, 5);
        assert_eq!(segments.iter().map(|s| s.doc_frequency("common")).sum::<u32>(), 5);

        // Sources are gone from disk, the target is present
        let on_disk = store.list().unwrap();
        assert_eq!(on_disk.len(), 2);
        assert!(on_disk.contains(&target));

        assert_eq!(merger.merge_once().unwrap(), None);
    }

    #[test]
    fn test_background_merger_start_stop() {
        let config = EngineConfig::default();
        let (merger, set) = merger_fixture(&config, None, 4);

        let mut background =
            BackgroundMerger::start(Arc::new(merger), Duration::from_millis(10)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while set.load().len() != 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(background.is_running());
        background.stop();
        assert!(!background.is_running());

        let segments = set.load();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].id().level, 1);
        assert_eq!(segments[0].doc_count(), 4);
    }
}
