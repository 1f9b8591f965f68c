//! Segment-based inverted index
//!
//! Recent writes land in a `MutableBuffer`; flushes turn it into an
//! immutable single-file segment. Searches read the buffer and every live
//! segment, and a background merger compacts level-0 segments into larger
//! ones.
//!
//! # Architecture
//!
//! - `MutableBuffer`: in-memory postings for recent writes
//! - `PostingBuilder`: encodes posting lists for a `PostingProfile`
//! - `SegmentWriter` / `SegmentReader`: segment file encoding and access
//! - `SegmentStore`: segment directory with atomic writes
//! - `Merger` / `BackgroundMerger`: tiered compaction
//! - `SegmentIndex`: combines all of the above

mod buffer;
mod builder;
mod elias_fano;
mod index;
mod merge;
mod postings;
mod reader;
mod statistics;
mod store;
mod term_dict;
mod types;
mod writer;

pub use buffer::MutableBuffer;
pub use builder::{BuiltPostings, PostingBuilder};
pub use elias_fano::EliasFano;
pub use index::{SegmentIndex, WriterStats};
pub use merge::{BackgroundMerger, MergeTask, Merger, SegmentSet, TieredMergePolicy};
pub use postings::{build_block_meta, encode_posting_list, BlockScoring, PostingView};
pub use reader::{
    ByteSlice, SegmentBytes, SegmentHeader, SegmentReader, FORMAT_VERSION, HEADER_BYTES,
    SEGMENT_MAGIC,
};
pub use statistics::{bm25_term_score, idf, CorpusStatistics, SegmentStatistics};
pub use store::SegmentStore;
pub use term_dict::{TermDictionary, TermEntry};
pub use types::{
    BlockMeta, DocId, Document, Posting, SegmentId, BLOCK_META_BYTES, BLOCK_SIZE,
    SEGMENT_EXTENSION,
};
pub use writer::{merge_postings, SegmentWriter};
