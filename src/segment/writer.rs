//! Segment writer for creating new immutable segments
//!
//! Produces the bytes of a single segment file, either from the mutable
//! buffer (flush) or from a set of existing segments (merge). Merging walks
//! the sorted term lists of all sources together and merges each term's
//! posting lists by doc id, so no source is re-tokenized.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{FtsError, Result};

use super::buffer::MutableBuffer;
use super::builder::{BuiltPostings, PostingBuilder};
use super::postings::PostingView;
use super::reader::{
    encode_docs, Section, SegmentHeader, SegmentReader, HEADER_BYTES, SECTION_COUNT,
    TRAILER_BYTES,
};
use super::statistics::SegmentStatistics;
use super::types::{Posting, SegmentId};

/// Writer for one new segment
pub struct SegmentWriter {
    segment_id: SegmentId,
    builder: PostingBuilder,
}

impl SegmentWriter {
    pub fn new(segment_id: SegmentId, config: &EngineConfig) -> Self {
        Self::with_builder(
            segment_id,
            PostingBuilder::new(
                config.profile,
                config.dictionary,
                config.roaring_min_postings,
                config.bm25,
            ),
        )
    }

    pub fn with_builder(segment_id: SegmentId, builder: PostingBuilder) -> Self {
        Self {
            segment_id,
            builder,
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Encode the buffer contents; the buffer is left untouched
    pub fn write_buffer(&self, buffer: &MutableBuffer) -> Result<Vec<u8>> {
        let terms = buffer
            .sorted_terms()
            .into_iter()
            .map(|(term, postings)| (Cow::Borrowed(term), Cow::Borrowed(postings)))
            .collect();
        let built = self.builder.build(terms, buffer.stats())?;
        self.assemble(built, buffer.stats())
    }

    /// Merge several segments into one
    pub fn write_merged(&self, segments: &[Arc<SegmentReader>]) -> Result<Vec<u8>> {
        if segments.is_empty() {
            return Err(FtsError::InvalidRequest("No segments to merge".into()));
        }

        let parts: Vec<&SegmentStatistics> = segments.iter().map(|s| s.stats()).collect();
        let stats = SegmentStatistics::merge(&parts);

        let mut positions = vec![0usize; segments.len()];
        let mut heap: BinaryHeap<Reverse<(&str, usize)>> = segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.term_count() > 0)
            .map(|(i, s)| Reverse((s.term(0), i)))
            .collect();

        let mut terms = Vec::new();
        while let Some(Reverse((term, first))) = heap.pop() {
            let mut sources = vec![first];
            while heap.peek().map_or(false, |Reverse((next, _))| *next == term) {
                if let Some(Reverse((_, i))) = heap.pop() {
                    sources.push(i);
                }
            }

            let mut lists = Vec::with_capacity(sources.len());
            for &i in &sources {
                let segment = &segments[i];
                lists.push(segment.postings_for(&segment.entry(positions[i]))?);

                positions[i] += 1;
                if positions[i] < segment.term_count() as usize {
                    heap.push(Reverse((segment.term(positions[i]), i)));
                }
            }

            terms.push((Cow::Borrowed(term), Cow::Owned(merge_postings(&lists))));
        }

        let built = self.builder.build(terms, &stats)?;
        self.assemble(built, &stats)
    }

    fn assemble(&self, built: BuiltPostings, stats: &SegmentStatistics) -> Result<Vec<u8>> {
        let mut docs = Vec::new();
        encode_docs(stats, &mut docs)?;

        let sections: [&[u8]; SECTION_COUNT] = [
            &built.entries,
            &built.strings,
            &built.fst,
            &built.postings,
            &docs,
        ];
        let mut header = SegmentHeader {
            id: self.segment_id,
            profile: self.builder.profile(),
            dictionary: self.builder.dictionary(),
            doc_count: stats.doc_count(),
            term_count: built.term_count,
            total_doc_length: stats.total_doc_length(),
            sections: [Section::default(); SECTION_COUNT],
        };

        let mut offset = HEADER_BYTES as u64;
        for (section, data) in header.sections.iter_mut().zip(sections) {
            section.offset = offset;
            section.len = data.len() as u64;
            offset += section.len;
        }

        let mut out = Vec::with_capacity(offset as usize + TRAILER_BYTES);
        header.encode(&mut out);
        for data in sections {
            out.extend_from_slice(data);
        }
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }
}

/// K-way merge of posting lists by doc id
///
/// Sources cover disjoint documents; a duplicate doc id keeps the first.
pub fn merge_postings(lists: &[PostingView<'_>]) -> Vec<Posting> {
    let total = lists.iter().map(|l| l.len()).sum();
    let mut merged: Vec<Posting> = Vec::with_capacity(total);

    let mut heap: BinaryHeap<Reverse<(u32, usize, usize)>> = lists
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.is_empty())
        .map(|(i, l)| Reverse((l.doc_id(0), i, 0)))
        .collect();

    while let Some(Reverse((doc_id, list, pos))) = heap.pop() {
        if merged.last().map_or(true, |p| p.doc_id != doc_id) {
            merged.push(Posting::new(doc_id, lists[list].term_freq(pos)));
        }
        let next = pos + 1;
        if next < lists[list].len() {
            heap.push(Reverse((lists[list].doc_id(next), list, next)));
        }
    }
    merged
}
