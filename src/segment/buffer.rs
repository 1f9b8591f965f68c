//! Mutable buffer for in-memory writes
//!
//! Postings are keyed by the token hash computed during tokenization, so
//! the writer lock only covers map insertion. Flush moves the whole buffer
//! out of the writer state and encodes it without holding the lock.

use std::collections::HashMap;

use crate::tokenizer::{term_hash, Token};

use super::statistics::SegmentStatistics;
use super::types::{DocId, Posting};

#[derive(Clone, Debug)]
struct BufferedTerm {
    term: String,
    postings: Vec<Posting>,
}

/// In-memory mutable buffer for recent writes
///
/// This holds indexed data before it is flushed to an immutable segment.
#[derive(Clone, Debug, Default)]
pub struct MutableBuffer {
    /// Token hash to the terms sharing it (almost always exactly one)
    terms: HashMap<u64, Vec<BufferedTerm>>,
    /// Document table for buffered documents
    stats: SegmentStatistics,
    /// Number of distinct terms
    term_count: usize,
    /// Number of (term, document) postings
    posting_count: usize,
    /// Approximate size in bytes
    size_bytes: usize,
}

impl MutableBuffer {
    /// Create a new empty mutable buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a tokenized document
    ///
    /// Doc ids must be strictly increasing so posting lists stay sorted.
    pub fn index_document(&mut self, doc_id: DocId, key: String, tokens: Vec<Token>, doc_len: u32) {
        self.size_bytes += key.len() + 8;
        self.stats.add_document(doc_id, doc_len, key);

        for token in tokens {
            let posting = Posting::new(doc_id, token.frequency);
            let bucket = self.terms.entry(token.hash).or_default();
            match bucket.iter_mut().find(|t| t.term == token.term) {
                Some(existing) => existing.postings.push(posting),
                None => {
                    self.size_bytes += token.term.len() + std::mem::size_of::<BufferedTerm>();
                    self.term_count += 1;
                    bucket.push(BufferedTerm {
                        term: token.term,
                        postings: vec![posting],
                    });
                }
            }
            self.posting_count += 1;
            self.size_bytes += std::mem::size_of::<Posting>();
        }
    }

    /// Get postings for a term
    pub fn get_postings(&self, term: &str) -> Option<&[Posting]> {
        self.terms
            .get(&term_hash(term))?
            .iter()
            .find(|t| t.term == term)
            .map(|t| t.postings.as_slice())
    }

    /// Get document frequency for a term
    pub fn doc_frequency(&self, term: &str) -> u32 {
        self.get_postings(term).map_or(0, |p| p.len() as u32)
    }

    /// All terms with their postings, sorted by term
    pub fn sorted_terms(&self) -> Vec<(&str, &[Posting])> {
        let mut terms: Vec<_> = self
            .terms
            .values()
            .flatten()
            .map(|t| (t.term.as_str(), t.postings.as_slice()))
            .collect();
        terms.sort_unstable_by(|a, b| a.0.cmp(b.0));
        terms
    }

    /// Get the document table
    pub fn stats(&self) -> &SegmentStatistics {
        &self.stats
    }

    /// Get document count
    pub fn doc_count(&self) -> u32 {
        self.stats.doc_count()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.doc_count() == 0
    }

    pub fn term_count(&self) -> usize {
        self.term_count
    }

    pub fn posting_count(&self) -> usize {
        self.posting_count
    }

    /// Total token occurrences across buffered documents
    pub fn token_count(&self) -> u64 {
        self.stats.total_doc_length()
    }

    /// Get approximate size in bytes
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Check if buffer should be flushed
    pub fn should_flush(&self, flush_threshold: usize) -> bool {
        self.doc_count() as usize >= flush_threshold
    }

    /// Move every document of `newer` behind the ones already buffered
    ///
    /// `newer` must only hold doc ids above this buffer's.
    pub fn append(&mut self, newer: MutableBuffer) {
        for (doc_id, doc_len, key) in newer.stats.iter() {
            self.size_bytes += key.len() + 8;
            self.stats.add_document(doc_id, doc_len, key.to_string());
        }
        for (hash, bucket) in newer.terms {
            let target = self.terms.entry(hash).or_default();
            for incoming in bucket {
                self.posting_count += incoming.postings.len();
                self.size_bytes += incoming.postings.len() * std::mem::size_of::<Posting>();
                match target.iter_mut().find(|t| t.term == incoming.term) {
                    Some(existing) => existing.postings.extend(incoming.postings),
                    None => {
                        self.size_bytes +=
                            incoming.term.len() + std::mem::size_of::<BufferedTerm>();
                        self.term_count += 1;
                        target.push(incoming);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenizerConfig;
    use crate::tokenizer::Tokenizer;

    fn index(buffer: &mut MutableBuffer, doc_id: DocId, text: &str) {
        let tokenizer = Tokenizer::new(&TokenizerConfig::default());
        let (tokens, len) = tokenizer.tokens(text);
        buffer.index_document(doc_id, format!("doc-{}", doc_id), tokens, len);
    }

    #[test]
    fn test_index_document() {
        let mut buffer = MutableBuffer::new();
        index(&mut buffer, 0, "hello hello world");

        assert_eq!(buffer.doc_count(), 1);
        assert_eq!(buffer.doc_frequency("hello"), 1);
        assert_eq!(buffer.get_postings("hello"), Some(&[Posting::new(0, 2)][..]));
        assert_eq!(buffer.token_count(), 3);
        assert_eq!(buffer.term_count(), 2);
        assert_eq!(buffer.stats().get_key(0), Some("doc-0"));
    }

    #[test]
    fn test_postings_sorted_by_doc_id() {
        let mut buffer = MutableBuffer::new();
        for id in 0..10 {
            index(&mut buffer, id, "shared term");
        }

        let postings = buffer.get_postings("shared").unwrap();
        assert!(postings.windows(2).all(|w| w[0].doc_id < w[1].doc_id));
        assert_eq!(buffer.posting_count(), 20);
    }

    #[test]
    fn test_hash_collisions_keep_terms_apart() {
        let mut buffer = MutableBuffer::new();
        let tokens = vec![
            Token {
                term: "alpha".into(),
                hash: 7,
                frequency: 1,
            },
            Token {
                term: "beta".into(),
                hash: 7,
                frequency: 3,
            },
        ];
        buffer.index_document(0, "k".into(), tokens, 4);

        let sorted = buffer.sorted_terms();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].0, "alpha");
        assert_eq!(sorted[1].1, &[Posting::new(0, 3)][..]);
    }

    #[test]
    fn test_append_keeps_doc_order() {
        let mut older = MutableBuffer::new();
        index(&mut older, 0, "shared first");
        index(&mut older, 1, "shared");
        let mut newer = MutableBuffer::new();
        index(&mut newer, 2, "shared last");

        older.append(newer);
        assert_eq!(older.doc_count(), 3);
        assert_eq!(older.term_count(), 3);
        assert_eq!(older.posting_count(), 5);
        let ids: Vec<DocId> = older
            .get_postings("shared")
            .unwrap()
            .iter()
            .map(|p| p.doc_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(older.stats().get_key(2), Some("doc-2"));
    }

    #[test]
    fn test_flush_threshold_and_take() {
        let mut buffer = MutableBuffer::new();
        index(&mut buffer, 0, "a b");
        assert!(!buffer.should_flush(2));
        index(&mut buffer, 1, "c d");
        assert!(buffer.should_flush(2));

        let taken = std::mem::take(&mut buffer);
        assert_eq!(taken.doc_count(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.size_bytes(), 0);
        assert!(buffer.get_postings("a").is_none());
    }
}
