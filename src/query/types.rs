//! Core types for the query system

use std::cmp::Ordering;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::segment::DocId;

/// One ranked document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    /// Internal document id
    pub doc_id: DocId,
    /// Caller-supplied document id
    pub key: String,
    /// BM25 score
    pub score: f32,
}

/// Result page of one query
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchOutcome {
    /// Requested page, best first
    pub hits: Vec<ScoredDoc>,
    /// Number of documents matching the query
    pub total: u64,
}

/// Heap entry ordered from worst to best
///
/// Higher scores rank better; equal scores rank the lower doc id first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ScoreEntry {
    pub score: OrderedFloat<f32>,
    pub doc_id: DocId,
    /// Index of the source holding the document
    pub source: usize,
}

impl ScoreEntry {
    pub fn new(score: f32, doc_id: DocId, source: usize) -> Self {
        Self {
            score: OrderedFloat(score),
            doc_id,
            source,
        }
    }
}

impl Ord for ScoreEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.doc_id.cmp(&self.doc_id))
    }
}

impl PartialOrd for ScoreEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_entry_order() {
        let high = ScoreEntry::new(2.0, 9, 0);
        let low = ScoreEntry::new(1.0, 1, 0);
        assert!(high > low);

        // Same score: lower doc id ranks higher
        let first = ScoreEntry::new(1.5, 3, 0);
        let second = ScoreEntry::new(1.5, 7, 1);
        assert!(first > second);
    }
}
