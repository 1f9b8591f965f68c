//! Corpus statistics for BM25 scoring
//!
//! Every segment stores the length and external key of each document it
//! covers. Queries aggregate these into global statistics so scores do not
//! depend on how documents happen to be split across segments.

use crate::config::Bm25Params;

use super::types::DocId;

/// Inverse document frequency: `ln((N - df + 0.5) / (df + 0.5) + 1)`
pub fn idf(doc_freq: u32, total_docs: u32) -> f32 {
    let n = total_docs as f32;
    let df = doc_freq as f32;
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// BM25 contribution of one term occurrence
pub fn bm25_term_score(idf: f32, tf: f32, doc_len: f32, avgdl: f32, params: &Bm25Params) -> f32 {
    let norm = if avgdl > 0.0 {
        1.0 - params.b + params.b * (doc_len / avgdl)
    } else {
        1.0
    };
    idf * (tf * (params.k1 + 1.0)) / (tf + params.k1 * norm)
}

/// Per-document table of a segment (sorted by doc id)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentStatistics {
    doc_ids: Vec<DocId>,
    doc_lengths: Vec<u32>,
    keys: Vec<String>,
    total_doc_length: u64,
}

impl SegmentStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create statistics with pre-allocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            doc_ids: Vec::with_capacity(capacity),
            doc_lengths: Vec::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            total_doc_length: 0,
        }
    }

    /// Append a document; doc ids must arrive in ascending order
    pub fn add_document(&mut self, doc_id: DocId, doc_len: u32, key: String) {
        debug_assert!(self.doc_ids.last().map_or(true, |&last| last < doc_id));
        self.doc_ids.push(doc_id);
        self.doc_lengths.push(doc_len);
        self.keys.push(key);
        self.total_doc_length += doc_len as u64;
    }

    pub fn doc_count(&self) -> u32 {
        self.doc_ids.len() as u32
    }

    pub fn total_doc_length(&self) -> u64 {
        self.total_doc_length
    }

    /// Average document length
    pub fn avgdl(&self) -> f64 {
        if self.doc_ids.is_empty() {
            0.0
        } else {
            self.total_doc_length as f64 / self.doc_ids.len() as f64
        }
    }

    fn position(&self, doc_id: DocId) -> Option<usize> {
        self.doc_ids.binary_search(&doc_id).ok()
    }

    /// Get document length for a doc id
    pub fn get_doc_length(&self, doc_id: DocId) -> Option<u32> {
        self.position(doc_id).map(|i| self.doc_lengths[i])
    }

    /// Get the external key of a doc id
    pub fn get_key(&self, doc_id: DocId) -> Option<&str> {
        self.position(doc_id).map(|i| self.keys[i].as_str())
    }

    pub fn doc_ids(&self) -> &[DocId] {
        &self.doc_ids
    }

    pub fn doc_lengths(&self) -> &[u32] {
        &self.doc_lengths
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn max_doc_id(&self) -> Option<DocId> {
        self.doc_ids.last().copied()
    }

    /// Iterate `(doc_id, length, key)` in doc id order
    pub fn iter(&self) -> impl Iterator<Item = (DocId, u32, &str)> + '_ {
        self.doc_ids
            .iter()
            .zip(&self.doc_lengths)
            .zip(&self.keys)
            .map(|((&id, &len), key)| (id, len, key.as_str()))
    }

    /// Combine the tables of several segments covering disjoint documents
    pub fn merge(parts: &[&SegmentStatistics]) -> Self {
        let total: usize = parts.iter().map(|p| p.doc_ids.len()).sum();
        let mut rows: Vec<(DocId, u32, &str)> = Vec::with_capacity(total);
        for part in parts {
            rows.extend(part.iter());
        }
        rows.sort_unstable_by_key(|row| row.0);
        rows.dedup_by_key(|row| row.0);

        let mut merged = Self::with_capacity(rows.len());
        for (doc_id, len, key) in rows {
            merged.add_document(doc_id, len, key.to_string());
        }
        merged
    }

    /// Create from decoded columns
    pub fn from_columns(doc_ids: Vec<DocId>, doc_lengths: Vec<u32>, keys: Vec<String>) -> Self {
        let total_doc_length = doc_lengths.iter().map(|&l| l as u64).sum();
        Self {
            doc_ids,
            doc_lengths,
            keys,
            total_doc_length,
        }
    }
}

/// Aggregated statistics across the buffer and all segments
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CorpusStatistics {
    pub total_docs: u32,
    pub total_doc_length: u64,
}

impl CorpusStatistics {
    pub fn add(&mut self, doc_count: u32, total_doc_length: u64) {
        self.total_docs += doc_count;
        self.total_doc_length += total_doc_length;
    }

    /// Global average document length
    pub fn avgdl(&self) -> f32 {
        if self.total_docs == 0 {
            0.0
        } else {
            (self.total_doc_length as f64 / self.total_docs as f64) as f32
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_docs == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_statistics() {
        let mut stats = SegmentStatistics::new();
        stats.add_document(4, 100, "a".into());
        stats.add_document(9, 200, "b".into());
        stats.add_document(11, 150, "c".into());

        assert_eq!(stats.doc_count(), 3);
        assert_eq!(stats.total_doc_length(), 450);
        assert!((stats.avgdl() - 150.0).abs() < 0.001);
        assert_eq!(stats.get_doc_length(9), Some(200));
        assert_eq!(stats.get_key(11), Some("c"));
        assert_eq!(stats.get_doc_length(5), None);
    }

    #[test]
    fn test_idf_formula() {
        // N = 3, df = 2: ln((3 - 2 + 0.5) / 2.5 + 1) = ln(1.6)
        assert!((idf(2, 3) - 1.6f32.ln()).abs() < 1e-6);
        // Rarer terms get higher idf
        assert!(idf(1, 100) > idf(50, 100));
        // Never negative, even when every document matches
        assert!(idf(100, 100) > 0.0);
    }

    #[test]
    fn test_bm25_monotone_in_tf() {
        let params = Bm25Params::default();
        let w = idf(10, 100);
        let mut previous = 0.0;
        for tf in 1..50 {
            let score = bm25_term_score(w, tf as f32, 120.0, 100.0, &params);
            assert!(score >= previous);
            previous = score;
        }
    }

    #[test]
    fn test_bm25_length_normalization() {
        let params = Bm25Params::default();
        let w = idf(10, 100);
        let short = bm25_term_score(w, 3.0, 50.0, 100.0, &params);
        let long = bm25_term_score(w, 3.0, 300.0, 100.0, &params);
        assert!(short > long);
    }

    #[test]
    fn test_merge_statistics() {
        let mut a = SegmentStatistics::new();
        a.add_document(0, 100, "x".into());
        a.add_document(2, 200, "z".into());

        let mut b = SegmentStatistics::new();
        b.add_document(1, 150, "y".into());
        b.add_document(3, 250, "w".into());

        let merged = SegmentStatistics::merge(&[&a, &b]);

        assert_eq!(merged.doc_ids(), &[0, 1, 2, 3]);
        assert_eq!(merged.total_doc_length(), 700);
        assert!((merged.avgdl() - 175.0).abs() < 0.001);
        assert_eq!(merged.get_key(1), Some("y"));
    }

    #[test]
    fn test_corpus_statistics() {
        let mut corpus = CorpusStatistics::default();
        assert!(corpus.is_empty());
        assert_eq!(corpus.avgdl(), 0.0);

        corpus.add(50, 5_000);
        corpus.add(50, 7_500);
        assert_eq!(corpus.total_docs, 100);
        assert!((corpus.avgdl() - 125.0).abs() < 0.001);
    }
}
