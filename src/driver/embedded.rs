use std::sync::Arc;

use tracing::info;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{FtsError, Result};
use crate::segment::{BackgroundMerger, Document, SegmentIndex};

use super::{index_stats, search_index, Driver, DriverInfo, IndexStats, SearchResponse};

/// Engine running inside the caller's process
pub struct EmbeddedDriver {
    index: Arc<SegmentIndex>,
    merger: Option<BackgroundMerger>,
    closed: bool,
}

impl EmbeddedDriver {
    /// Open (or create) an index and start its background merger
    pub fn open(config: EngineConfig) -> Result<Self> {
        let index = Arc::new(SegmentIndex::open(config)?);
        let merge = &index.config().merge;
        let merger = if merge.enabled {
            Some(BackgroundMerger::start(index.merger(), merge.poll_interval())?)
        } else {
            None
        };
        Ok(Self {
            index,
            merger,
            closed: false,
        })
    }

    pub fn index(&self) -> &Arc<SegmentIndex> {
        &self.index
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(FtsError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Driver for EmbeddedDriver {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn info(&self) -> DriverInfo {
        let config = self.index.config();
        DriverInfo::new(
            format!(
                "In-process BM25 index ({} postings, {:?} retrieval)",
                config.profile.as_str(),
                config.retrieval
            ),
            &["bm25", "segments", "background-merge", "writable"],
        )
    }

    fn add_document(&mut self, doc: &Document) -> Result<()> {
        self.check_open()?;
        self.index.add_document(&doc.id, &doc.text)?;
        Ok(())
    }

    fn add_documents(
        &mut self,
        docs: &[Document],
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.check_open()?;
        self.index.add_documents(docs, cancel, progress)?;
        Ok(())
    }

    fn build(&mut self) -> Result<()> {
        self.check_open()?;
        self.index.build()
    }

    fn search(&mut self, query: &str, limit: usize, offset: usize) -> Result<SearchResponse> {
        self.check_open()?;
        search_index(&self.index, query, limit, offset)
    }

    fn stats(&mut self) -> Result<IndexStats> {
        self.check_open()?;
        Ok(index_stats(&self.index))
    }

    fn count(&mut self) -> Result<u64> {
        self.check_open()?;
        Ok(self.index.count())
    }

    /// Stops the merger and persists any buffered documents
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(mut merger) = self.merger.take() {
            merger.stop();
        }
        if self.index.store().is_some() && !self.index.is_sealed() {
            self.index.flush()?;
        }
        self.closed = true;
        info!(docs = self.index.count(), "Embedded driver closed");
        Ok(())
    }
}
