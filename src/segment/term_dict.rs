//! Term dictionary
//!
//! Maps each term of a segment to its ordinal in the fixed-width term entry
//! table. Two backings are supported: an FST built once from the sorted
//! term list and read in place from segment bytes, or a hash map rebuilt
//! from the term strings when the segment is opened.

use std::collections::HashMap;
use std::io;

use fst::{Map, MapBuilder};

use crate::config::DictionaryKind;

use super::reader::ByteSlice;
use super::types::{read_u32, read_u64};

/// Size of an encoded [`TermEntry`]
pub const TERM_ENTRY_BYTES: usize = 20;

/// Per-term record stored in the term entry table
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TermEntry {
    /// Offset of the encoded list inside the postings section
    pub posting_offset: u64,
    /// Encoded list length in bytes
    pub posting_len: u32,
    /// Number of documents containing the term
    pub doc_freq: u32,
    /// Segment-local idf
    pub idf: f32,
}

impl TermEntry {
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.posting_offset.to_le_bytes());
        out.extend_from_slice(&self.posting_len.to_le_bytes());
        out.extend_from_slice(&self.doc_freq.to_le_bytes());
        out.extend_from_slice(&self.idf.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Self {
        Self {
            posting_offset: read_u64(bytes, 0),
            posting_len: read_u32(bytes, 8),
            doc_freq: read_u32(bytes, 12),
            idf: f32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
        }
    }
}

/// Build FST bytes mapping each term to its ordinal
///
/// Terms MUST be sorted and distinct.
pub fn build_fst<'a, I>(sorted_terms: I) -> io::Result<Vec<u8>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut builder = MapBuilder::memory();
    for (ordinal, term) in sorted_terms.into_iter().enumerate() {
        builder
            .insert(term.as_bytes(), ordinal as u64)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
    builder
        .into_inner()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Term to ordinal lookup for one segment
pub enum TermDictionary {
    Fst(Map<ByteSlice>),
    Hash(HashMap<String, u32>),
}

impl TermDictionary {
    /// Open an FST dictionary over segment bytes
    pub fn open_fst(data: ByteSlice) -> io::Result<Self> {
        let map = Map::new(data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(TermDictionary::Fst(map))
    }

    /// Build a hash dictionary from terms listed in ordinal order
    pub fn from_terms<'a, I>(terms: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let map = terms
            .into_iter()
            .enumerate()
            .map(|(ordinal, term)| (term.to_string(), ordinal as u32))
            .collect();
        TermDictionary::Hash(map)
    }

    /// Look up a term and return its ordinal
    pub fn get(&self, term: &str) -> Option<u32> {
        match self {
            TermDictionary::Fst(map) => map.get(term.as_bytes()).map(|ordinal| ordinal as u32),
            TermDictionary::Hash(map) => map.get(term).copied(),
        }
    }

    pub fn kind(&self) -> DictionaryKind {
        match self {
            TermDictionary::Fst(_) => DictionaryKind::Fst,
            TermDictionary::Hash(_) => DictionaryKind::Hash,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TermDictionary::Fst(map) => map.len(),
            TermDictionary::Hash(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate resident size in bytes
    pub fn memory_bytes(&self) -> usize {
        match self {
            TermDictionary::Fst(map) => map.as_fst().as_bytes().len(),
            TermDictionary::Hash(map) => map
                .keys()
                .map(|k| k.len() + std::mem::size_of::<(String, u32)>())
                .sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::reader::SegmentBytes;
    use std::sync::Arc;

    fn fst_dict(terms: &[&str]) -> TermDictionary {
        let bytes = build_fst(terms.iter().copied()).unwrap();
        let len = bytes.len();
        let slice = ByteSlice::new(SegmentBytes::Owned(Arc::new(bytes)), 0, len);
        TermDictionary::open_fst(slice).unwrap()
    }

    #[test]
    fn test_fst_dictionary() {
        let dict = fst_dict(&["apple", "banana", "cherry"]);

        assert_eq!(dict.kind(), DictionaryKind::Fst);
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get("apple"), Some(0));
        assert_eq!(dict.get("cherry"), Some(2));
        assert_eq!(dict.get("date"), None);
    }

    #[test]
    fn test_fst_requires_sorted_terms() {
        assert!(build_fst(["banana", "apple"]).is_err());
        assert!(build_fst(["apple", "apple"]).is_err());
    }

    #[test]
    fn test_hash_dictionary_matches_fst() {
        let terms = ["ant", "bee", "cat", "dog"];
        let fst = fst_dict(&terms);
        let hash = TermDictionary::from_terms(terms);

        assert_eq!(hash.kind(), DictionaryKind::Hash);
        for term in terms.iter().chain(&["eel", ""]) {
            assert_eq!(fst.get(term), hash.get(term), "{}", term);
        }
    }

    #[test]
    fn test_term_entry_encoding() {
        let entry = TermEntry {
            posting_offset: 1 << 40,
            posting_len: 77,
            doc_freq: 12,
            idf: 0.75,
        };
        let mut out = Vec::new();
        entry.encode(&mut out);
        assert_eq!(out.len(), TERM_ENTRY_BYTES);
        assert_eq!(TermEntry::decode(&out), entry);
    }
}
