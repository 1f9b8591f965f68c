//! Posting list formats
//!
//! Every encoded list starts with a profile tag and the posting count:
//! - Speed: `doc_id[n]` (u32) then `freq[n]` (u16)
//! - Balanced: block count, 128-posting block metadata, the two arrays,
//!   then a length-prefixed Roaring bitmap (length 0 when absent)
//! - Compact: Elias-Fano doc ids then `freq[n]`
//!
//! Readers work directly over the encoded bytes; only Compact lists and
//! Roaring bitmaps are decoded into owned memory.

use std::io;

use roaring::RoaringBitmap;

use crate::config::{Bm25Params, PostingProfile};

use super::elias_fano::EliasFano;
use super::statistics::bm25_term_score;
use super::types::{read_u16, read_u32, BlockMeta, DocId, Posting, BLOCK_META_BYTES, BLOCK_SIZE};

/// Segment-local scoring inputs needed while encoding block metadata
pub struct BlockScoring<'a> {
    pub idf: f32,
    pub avgdl: f32,
    pub params: &'a Bm25Params,
    pub doc_len: &'a dyn Fn(DocId) -> u32,
}

/// Encode one sorted posting list for the given profile
pub fn encode_posting_list(
    profile: PostingProfile,
    postings: &[Posting],
    scoring: &BlockScoring<'_>,
    roaring_min_postings: usize,
    out: &mut Vec<u8>,
) -> io::Result<()> {
    debug_assert!(postings.windows(2).all(|w| w[0].doc_id < w[1].doc_id));

    out.push(profile.tag());
    out.extend_from_slice(&(postings.len() as u32).to_le_bytes());

    match profile {
        PostingProfile::Speed => {
            write_doc_ids(postings, out);
            write_freqs(postings, out);
        }
        PostingProfile::Balanced => {
            let blocks = build_block_meta(postings, scoring);
            out.extend_from_slice(&(blocks.len() as u32).to_le_bytes());
            for block in &blocks {
                block.encode(out);
            }
            write_doc_ids(postings, out);
            write_freqs(postings, out);

            if postings.len() >= roaring_min_postings {
                let bitmap: RoaringBitmap = postings.iter().map(|p| p.doc_id).collect();
                let mut bytes = Vec::with_capacity(bitmap.serialized_size());
                bitmap.serialize_into(&mut bytes)?;
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(&bytes);
            } else {
                out.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        PostingProfile::Compact => {
            let doc_ids: Vec<u32> = postings.iter().map(|p| p.doc_id).collect();
            EliasFano::from_sorted(&doc_ids).encode(out);
            write_freqs(postings, out);
        }
    }
    Ok(())
}

fn write_doc_ids(postings: &[Posting], out: &mut Vec<u8>) {
    out.reserve(postings.len() * 4);
    for p in postings {
        out.extend_from_slice(&p.doc_id.to_le_bytes());
    }
}

fn write_freqs(postings: &[Posting], out: &mut Vec<u8>) {
    out.reserve(postings.len() * 2);
    for p in postings {
        out.extend_from_slice(&p.term_freq.to_le_bytes());
    }
}

/// Compute block-max metadata for every 128-posting block
pub fn build_block_meta(postings: &[Posting], scoring: &BlockScoring<'_>) -> Vec<BlockMeta> {
    postings
        .chunks(BLOCK_SIZE)
        .map(|block| {
            let mut meta = BlockMeta {
                min_doc_id: block[0].doc_id,
                max_doc_id: block[block.len() - 1].doc_id,
                max_block_score: 0.0,
                max_tf: 0,
                min_doc_len: u32::MAX,
            };
            for p in block {
                let len = (scoring.doc_len)(p.doc_id);
                let score = bm25_term_score(
                    scoring.idf,
                    p.term_freq as f32,
                    len as f32,
                    scoring.avgdl,
                    scoring.params,
                );
                meta.max_block_score = meta.max_block_score.max(score);
                meta.max_tf = meta.max_tf.max(p.term_freq);
                meta.min_doc_len = meta.min_doc_len.min(len);
            }
            meta
        })
        .collect()
}

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> io::Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| invalid("Posting list extends beyond data"))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

/// Read-only access to one posting list, from the buffer or a segment
pub enum PostingView<'a> {
    /// Postings still in the mutable buffer
    Buffer(&'a [Posting]),
    Plain {
        doc_ids: &'a [u8],
        freqs: &'a [u8],
    },
    Blocked {
        doc_ids: &'a [u8],
        freqs: &'a [u8],
        blocks: &'a [u8],
        bitmap: Option<RoaringBitmap>,
    },
    Compact {
        doc_ids: Vec<DocId>,
        freqs: &'a [u8],
    },
}

impl<'a> PostingView<'a> {
    /// Parse an encoded posting list
    pub fn parse(bytes: &'a [u8]) -> io::Result<Self> {
        let mut pos = 0usize;
        let header = take(bytes, &mut pos, 5)?;
        let profile =
            PostingProfile::from_tag(header[0]).ok_or_else(|| invalid("Unknown posting profile"))?;
        let count = read_u32(header, 1) as usize;

        match profile {
            PostingProfile::Speed => {
                let doc_ids = take(bytes, &mut pos, count * 4)?;
                let freqs = take(bytes, &mut pos, count * 2)?;
                Ok(PostingView::Plain { doc_ids, freqs })
            }
            PostingProfile::Balanced => {
                let block_count = read_u32(take(bytes, &mut pos, 4)?, 0) as usize;
                if block_count != count.div_ceil(BLOCK_SIZE) {
                    return Err(invalid("Block count does not match posting count"));
                }
                let blocks = take(bytes, &mut pos, block_count * BLOCK_META_BYTES)?;
                let doc_ids = take(bytes, &mut pos, count * 4)?;
                let freqs = take(bytes, &mut pos, count * 2)?;
                let bitmap_len = read_u32(take(bytes, &mut pos, 4)?, 0) as usize;
                let bitmap = if bitmap_len > 0 {
                    let raw = take(bytes, &mut pos, bitmap_len)?;
                    Some(RoaringBitmap::deserialize_from(raw)?)
                } else {
                    None
                };
                Ok(PostingView::Blocked {
                    doc_ids,
                    freqs,
                    blocks,
                    bitmap,
                })
            }
            PostingProfile::Compact => {
                let (ef, used) = EliasFano::decode(&bytes[pos..])?;
                pos += used;
                if ef.len() != count {
                    return Err(invalid("Elias-Fano length does not match posting count"));
                }
                let freqs = take(bytes, &mut pos, count * 2)?;
                Ok(PostingView::Compact {
                    doc_ids: ef.to_vec(),
                    freqs,
                })
            }
        }
    }

    /// Number of postings
    pub fn len(&self) -> usize {
        match self {
            PostingView::Buffer(p) => p.len(),
            PostingView::Plain { freqs, .. } | PostingView::Blocked { freqs, .. } => freqs.len() / 2,
            PostingView::Compact { doc_ids, .. } => doc_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn doc_id(&self, i: usize) -> DocId {
        match self {
            PostingView::Buffer(p) => p[i].doc_id,
            PostingView::Plain { doc_ids, .. } | PostingView::Blocked { doc_ids, .. } => {
                read_u32(doc_ids, i * 4)
            }
            PostingView::Compact { doc_ids, .. } => doc_ids[i],
        }
    }

    #[inline]
    pub fn term_freq(&self, i: usize) -> u16 {
        match self {
            PostingView::Buffer(p) => p[i].term_freq,
            PostingView::Plain { freqs, .. }
            | PostingView::Blocked { freqs, .. }
            | PostingView::Compact { freqs, .. } => read_u16(freqs, i * 2),
        }
    }

    /// Number of metadata blocks (0 when the list has none)
    pub fn block_count(&self) -> usize {
        match self {
            PostingView::Blocked { blocks, .. } => blocks.len() / BLOCK_META_BYTES,
            _ => 0,
        }
    }

    pub fn block(&self, b: usize) -> Option<BlockMeta> {
        match self {
            PostingView::Blocked { blocks, .. } if b < blocks.len() / BLOCK_META_BYTES => Some(
                BlockMeta::decode(&blocks[b * BLOCK_META_BYTES..(b + 1) * BLOCK_META_BYTES]),
            ),
            _ => None,
        }
    }

    /// Binary search for `target` in `[lo, hi)`
    fn search_range(&self, target: DocId, mut lo: usize, mut hi: usize) -> Option<usize> {
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let doc = self.doc_id(mid);
            if doc == target {
                return Some(mid);
            } else if doc < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    }

    /// Term frequency of `doc_id` in this list, if present
    pub fn find(&self, doc_id: DocId) -> Option<u16> {
        let len = self.len();
        let idx = match self {
            PostingView::Blocked { bitmap, .. } => {
                if let Some(bitmap) = bitmap {
                    if !bitmap.contains(doc_id) {
                        return None;
                    }
                }
                // First block whose max doc id reaches the target
                let (mut lo, mut hi) = (0usize, self.block_count());
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    let max = self.block(mid).map_or(DocId::MAX, |b| b.max_doc_id);
                    if max < doc_id {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                let start = lo * BLOCK_SIZE;
                self.search_range(doc_id, start.min(len), (start + BLOCK_SIZE).min(len))
            }
            _ => self.search_range(doc_id, 0, len),
        }?;
        Some(self.term_freq(idx))
    }

    /// Iterate `(doc_id, term_freq)` in doc id order
    pub fn iter(&self) -> impl Iterator<Item = Posting> + '_ {
        (0..self.len()).map(move |i| Posting::new(self.doc_id(i), self.term_freq(i)))
    }

    /// Largest term frequency in the list
    pub fn max_term_freq(&self) -> u16 {
        if self.block_count() > 0 {
            (0..self.block_count())
                .filter_map(|b| self.block(b))
                .map(|b| b.max_tf)
                .max()
                .unwrap_or(0)
        } else {
            (0..self.len()).map(|i| self.term_freq(i)).max().unwrap_or(0)
        }
    }
}
