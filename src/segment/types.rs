//! Core types for the segment-based index

use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal document identifier, assigned monotonically by the writer
pub type DocId = u32;

/// Segment file extension
pub const SEGMENT_EXTENSION: &str = "fts";

/// Segment identity, encoded in its file name as `seg_{generation}_{level}_{sequence}.fts`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId {
    /// Build generation that produced the segment
    pub generation: u32,
    /// Merge level (0 for flushed segments)
    pub level: u8,
    /// Store-wide monotonically increasing sequence number
    pub sequence: u32,
}

impl SegmentId {
    pub fn new(generation: u32, level: u8, sequence: u32) -> Self {
        Self {
            generation,
            level,
            sequence,
        }
    }

    /// File name of this segment
    pub fn file_name(&self) -> String {
        format!(
            "seg_{}_{}_{}.{}",
            self.generation, self.level, self.sequence, SEGMENT_EXTENSION
        )
    }

    /// Parse a segment file name; returns `None` for anything else
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name
            .strip_prefix("seg_")?
            .strip_suffix(SEGMENT_EXTENSION)?
            .strip_suffix('.')?;
        let mut parts = stem.split('_');
        let generation = parts.next()?.parse().ok()?;
        let level = parts.next()?.parse().ok()?;
        let sequence = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(generation, level, sequence))
    }
}

impl PartialOrd for SegmentId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Segments order by age: sequence numbers are unique and monotonic
impl Ord for SegmentId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.level.cmp(&other.level))
            .then_with(|| self.generation.cmp(&other.generation))
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg_{}_{}_{}", self.generation, self.level, self.sequence)
    }
}

/// A single posting entry within a posting list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub term_freq: u16,
}

impl Posting {
    pub fn new(doc_id: DocId, term_freq: u16) -> Self {
        Self { doc_id, term_freq }
    }
}

/// Postings per block of block-max metadata
pub const BLOCK_SIZE: usize = 128;

/// Skip and impact metadata for one block of postings
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockMeta {
    /// First doc id in the block
    pub min_doc_id: DocId,
    /// Last doc id in the block
    pub max_doc_id: DocId,
    /// Highest BM25 contribution in the block under segment statistics
    pub max_block_score: f32,
    /// Highest term frequency in the block
    pub max_tf: u16,
    /// Shortest document in the block
    pub min_doc_len: u32,
}

/// Size of an encoded [`BlockMeta`]
pub const BLOCK_META_BYTES: usize = 18;

impl BlockMeta {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.min_doc_id.to_le_bytes());
        out.extend_from_slice(&self.max_doc_id.to_le_bytes());
        out.extend_from_slice(&self.max_block_score.to_le_bytes());
        out.extend_from_slice(&self.max_tf.to_le_bytes());
        out.extend_from_slice(&self.min_doc_len.to_le_bytes());
    }

    /// Decode from exactly [`BLOCK_META_BYTES`] bytes
    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            min_doc_id: read_u32(bytes, 0),
            max_doc_id: read_u32(bytes, 4),
            max_block_score: f32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            max_tf: read_u16(bytes, 12),
            min_doc_len: read_u32(bytes, 14),
        }
    }
}

/// A document as seen by the writer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Caller-supplied identifier
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[inline]
pub(crate) fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[inline]
pub(crate) fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
pub(crate) fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
