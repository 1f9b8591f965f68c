//! Execution fronts
//!
//! Every way of running the engine implements [`Driver`], so callers can
//! switch between an in-process index, a worker process reached over a
//! local socket, and read-only memory-mapped segments without changing
//! their code.

mod embedded;
pub mod ipc;
mod mmap;
mod registry;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{FtsError, Result};
use crate::segment::{Document, SegmentIndex};

pub use crate::query::ScoredDoc as SearchHit;
pub use embedded::EmbeddedDriver;
pub use ipc::{IpcDriver, IpcWorker};
pub use mmap::MmapDriver;
pub use registry::{DriverFactory, DriverRegistry};

/// Documents between two progress reports in the default batch import
pub const PROGRESS_INTERVAL: usize = 1_000;

/// Static description of a driver
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub description: String,
    /// Short capability tags such as "bm25" or "read-only"
    pub features: Vec<String>,
}

impl DriverInfo {
    pub fn new(description: impl Into<String>, features: &[&str]) -> Self {
        Self {
            description: description.into(),
            features: features.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// One page of search results
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// Number of documents matching the query
    pub total: u64,
    /// Time spent evaluating the query
    pub duration: Duration,
}

/// Index size counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub doc_count: u32,
    pub term_count: u32,
    pub memory_bytes: u64,
}

/// Common contract of every execution front
pub trait Driver: Send {
    /// Registry name of the driver
    fn name(&self) -> &'static str;

    fn info(&self) -> DriverInfo;

    /// Index one document; re-adding a known id is a no-op
    fn add_document(&mut self, doc: &Document) -> Result<()>;

    /// Index a batch, checking `cancel` before every document
    ///
    /// `progress` receives `(indexed, total)` periodically and once at the
    /// end.
    fn add_documents(
        &mut self,
        docs: &[Document],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let total = docs.len();
        for (i, doc) in docs.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(FtsError::Cancelled { indexed: i });
            }
            self.add_document(doc)?;
            let indexed = i + 1;
            if indexed % PROGRESS_INTERVAL == 0 || indexed == total {
                progress(indexed, total);
            }
        }
        Ok(())
    }

    /// Seal the index: flush buffered documents and reject later writes
    fn build(&mut self) -> Result<()>;

    fn search(&mut self, query: &str, limit: usize, offset: usize) -> Result<SearchResponse>;

    fn stats(&mut self) -> Result<IndexStats>;

    /// Number of distinct documents
    fn count(&mut self) -> Result<u64> {
        Ok(self.stats()?.doc_count as u64)
    }

    /// Release resources; later calls fail with `FtsError::Closed`
    fn close(&mut self) -> Result<()>;
}

/// Run a query against a local index and time it
pub(crate) fn search_index(
    index: &SegmentIndex,
    query: &str,
    limit: usize,
    offset: usize,
) -> Result<SearchResponse> {
    let start = Instant::now();
    let outcome = index.search(query, limit, offset)?;
    Ok(SearchResponse {
        hits: outcome.hits,
        total: outcome.total,
        duration: start.elapsed(),
    })
}

/// Counters of a local index, saturated to the wire widths
pub(crate) fn index_stats(index: &SegmentIndex) -> IndexStats {
    IndexStats {
        doc_count: u32::try_from(index.count()).unwrap_or(u32::MAX),
        term_count: u32::try_from(index.term_count()).unwrap_or(u32::MAX),
        memory_bytes: index.memory_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal in-memory driver exercising the provided methods
    struct Recorder {
        added: Vec<String>,
    }

    impl Driver for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn info(&self) -> DriverInfo {
            DriverInfo::new("records ids", &["test"])
        }

        fn add_document(&mut self, doc: &Document) -> Result<()> {
            self.added.push(doc.id.clone());
            Ok(())
        }

        fn build(&mut self) -> Result<()> {
            Ok(())
        }

        fn search(&mut self, _: &str, _: usize, _: usize) -> Result<SearchResponse> {
            Ok(SearchResponse::default())
        }

        fn stats(&mut self) -> Result<IndexStats> {
            Ok(IndexStats {
                doc_count: self.added.len() as u32,
                ..Default::default()
            })
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_batch_import() {
        let mut driver = Recorder { added: Vec::new() };
        let docs: Vec<Document> = (0..2_100)
            .map(|i| Document::new(i.to_string(), "x"))
            .collect();

        let mut reports = Vec::new();
        driver
            .add_documents(&docs, &CancelToken::new(), &mut |done, total| {
                reports.push((done, total))
            })
            .unwrap();
        assert_eq!(reports, vec![(1_000, 2_100), (2_000, 2_100), (2_100, 2_100)]);
        assert_eq!(driver.count().unwrap(), 2_100);
        assert!(driver.info().has_feature("test"));
    }

    #[test]
    fn test_default_batch_import_cancelled() {
        let mut driver = Recorder { added: Vec::new() };
        let docs = vec![Document::new("a", "x")];
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = driver
            .add_documents(&docs, &cancel, &mut |_, _| {})
            .unwrap_err();
        assert!(matches!(err, FtsError::Cancelled { indexed: 0 }));
        assert!(driver.added.is_empty());
    }
}
