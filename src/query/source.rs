//! Searchable sources
//!
//! A query runs over the mutable buffer and every sealed segment. Both
//! expose the same read-only view: a document table and per-term posting
//! lists.

use crate::error::Result;
use crate::segment::{MutableBuffer, PostingView, SegmentReader, SegmentStatistics};

/// Read access needed to evaluate a query against one source
pub trait SearchSource: Send + Sync {
    /// Document table (ids, lengths, external keys)
    fn stats(&self) -> &SegmentStatistics;

    /// Number of documents containing `term`
    fn doc_frequency(&self, term: &str) -> u32;

    /// Posting list of `term`, if the source contains it
    fn postings(&self, term: &str) -> Result<Option<PostingView<'_>>>;
}

impl SearchSource for MutableBuffer {
    fn stats(&self) -> &SegmentStatistics {
        MutableBuffer::stats(self)
    }

    fn doc_frequency(&self, term: &str) -> u32 {
        MutableBuffer::doc_frequency(self, term)
    }

    fn postings(&self, term: &str) -> Result<Option<PostingView<'_>>> {
        Ok(self.get_postings(term).map(PostingView::Buffer))
    }
}

impl SearchSource for SegmentReader {
    fn stats(&self) -> &SegmentStatistics {
        SegmentReader::stats(self)
    }

    fn doc_frequency(&self, term: &str) -> u32 {
        SegmentReader::doc_frequency(self, term)
    }

    fn postings(&self, term: &str) -> Result<Option<PostingView<'_>>> {
        SegmentReader::postings(self, term)
    }
}
