use std::path::Path;

use crate::config::{EngineConfig, MergeConfig};
use crate::error::{FtsError, Result};
use crate::segment::{Document, SegmentIndex};

use super::{index_stats, search_index, Driver, DriverInfo, IndexStats, SearchResponse};

/// Read-only driver over memory-mapped segment files
///
/// Several processes can open the same directory; the pages are shared
/// through the OS page cache.
pub struct MmapDriver {
    index: SegmentIndex,
    closed: bool,
}

impl MmapDriver {
    /// Map every segment under `dir` with default query settings
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_config(EngineConfig::new(dir))
    }

    /// Map the segments of `config.data_dir`
    pub fn with_config(mut config: EngineConfig) -> Result<Self> {
        config.merge = MergeConfig {
            enabled: false,
            ..config.merge
        };
        Ok(Self {
            index: SegmentIndex::open_read_only(config)?,
            closed: false,
        })
    }

    pub fn index(&self) -> &SegmentIndex {
        &self.index
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(FtsError::Closed)
        } else {
            Ok(())
        }
    }

    fn unsupported(operation: &'static str) -> FtsError {
        FtsError::Unsupported {
            driver: "mmap",
            operation,
        }
    }
}

impl Driver for MmapDriver {
    fn name(&self) -> &'static str {
        "mmap"
    }

    fn info(&self) -> DriverInfo {
        DriverInfo::new(
            format!(
                "Read-only memory-mapped segments ({} segments)",
                self.index.segment_count()
            ),
            &["bm25", "segments", "read-only", "zero-copy"],
        )
    }

    fn add_document(&mut self, _doc: &Document) -> Result<()> {
        self.check_open()?;
        Err(Self::unsupported("add_document"))
    }

    fn add_documents(
        &mut self,
        _docs: &[Document],
        _cancel: &crate::cancel::CancelToken,
        _progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.check_open()?;
        Err(Self::unsupported("add_documents"))
    }

    /// Mapped segments are already sealed
    fn build(&mut self) -> Result<()> {
        self.check_open()
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

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
