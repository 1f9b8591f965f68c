//! BM25 query execution
//!
//! Scoring uses corpus-wide statistics (document count, average length and
//! per-term document frequency summed over every source), so a document
//! gets the same score whichever segment holds it.
//!
//! AND queries are driven by the shortest posting list; every candidate is
//! probed in the other lists with `PostingView::find`. When the driver list
//! carries block metadata and the top-k heap is full, blocks whose score
//! upper bound falls below the heap minimum are counted but not scored.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::config::{Bm25Params, RetrievalMode};
use crate::error::Result;
use crate::segment::{bm25_term_score, idf, CorpusStatistics, DocId, PostingView, BLOCK_SIZE};

use super::source::SearchSource;
use super::types::{ScoreEntry, ScoredDoc, SearchOutcome};

/// A query term with its corpus-wide idf
#[derive(Clone, Debug)]
struct QueryTerm<'q> {
    term: &'q str,
    idf: f32,
}

type TopK = BinaryHeap<Reverse<ScoreEntry>>;

/// Executes ranked queries over a set of sources
#[derive(Clone, Debug)]
pub struct QueryEngine {
    params: Bm25Params,
    mode: RetrievalMode,
}

impl QueryEngine {
    pub fn new(params: Bm25Params, mode: RetrievalMode) -> Self {
        Self { params, mode }
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn params(&self) -> &Bm25Params {
        &self.params
    }

    /// Rank documents matching `terms` and return one page
    ///
    /// `terms` must already be tokenized and distinct.
    pub fn search(
        &self,
        terms: &[String],
        sources: &[&dyn SearchSource],
        limit: usize,
        offset: usize,
    ) -> Result<SearchOutcome> {
        let mut corpus = CorpusStatistics::default();
        for source in sources {
            let stats = source.stats();
            corpus.add(stats.doc_count(), stats.total_doc_length());
        }
        if terms.is_empty() || corpus.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let mut query_terms = Vec::with_capacity(terms.len());
        for term in terms {
            let df: u32 = sources.iter().map(|s| s.doc_frequency(term)).sum();
            if df == 0 {
                match self.mode {
                    RetrievalMode::And => return Ok(SearchOutcome::default()),
                    RetrievalMode::Or => continue,
                }
            }
            query_terms.push(QueryTerm {
                term: term.as_str(),
                idf: idf(df, corpus.total_docs),
            });
        }
        if query_terms.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let k = limit.saturating_add(offset);
        let avgdl = corpus.avgdl();
        let mut heap = TopK::with_capacity(k.min(4096) + 1);
        let mut total = 0u64;

        for (index, source) in sources.iter().enumerate() {
            total += match self.mode {
                RetrievalMode::And => {
                    self.score_conjunction(index, *source, &query_terms, avgdl, k, &mut heap)?
                }
                RetrievalMode::Or => {
                    self.score_disjunction(index, *source, &query_terms, avgdl, k, &mut heap)?
                }
            };
        }

        let mut ranked: Vec<ScoreEntry> = heap.into_iter().map(|Reverse(entry)| entry).collect();
        ranked.sort_by(|a, b| b.cmp(a));

        let hits = ranked
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|entry| ScoredDoc {
                doc_id: entry.doc_id,
                key: sources[entry.source]
                    .stats()
                    .get_key(entry.doc_id)
                    .unwrap_or_default()
                    .to_string(),
                score: entry.score.0,
            })
            .collect();

        Ok(SearchOutcome { hits, total })
    }

    /// Documents containing every term; returns the match count
    fn score_conjunction(
        &self,
        source_index: usize,
        source: &dyn SearchSource,
        terms: &[QueryTerm<'_>],
        avgdl: f32,
        k: usize,
        heap: &mut TopK,
    ) -> Result<u64> {
        let mut lists: Vec<PostingView<'_>> = Vec::with_capacity(terms.len());
        for term in terms {
            match source.postings(term.term)? {
                Some(view) if !view.is_empty() => lists.push(view),
                _ => return Ok(0),
            }
        }

        let driver = (0..lists.len())
            .min_by_key(|&i| lists[i].len())
            .unwrap_or(0);
        let others: Vec<usize> = (0..lists.len()).filter(|&i| i != driver).collect();

        let stats = source.stats();
        let driver_list = &lists[driver];
        let len = driver_list.len();
        let block_count = driver_list.block_count();
        // Peak frequencies feed the block bound only
        let max_tfs: Vec<u16> = if block_count > 0 {
            lists
                .iter()
                .enumerate()
                .map(|(i, l)| if i == driver { 0 } else { l.max_term_freq() })
                .collect()
        } else {
            Vec::new()
        };
        let mut tfs = vec![0u16; lists.len()];
        let mut matched = 0u64;

        for block in 0..block_count.max(1) {
            let (start, end, skip_scoring) = match driver_list.block(block) {
                Some(meta) => {
                    let start = block * BLOCK_SIZE;
                    let bound: f32 = terms
                        .iter()
                        .enumerate()
                        .map(|(i, t)| {
                            let tf = if i == driver { meta.max_tf } else { max_tfs[i] };
                            bm25_term_score(
                                t.idf,
                                tf as f32,
                                meta.min_doc_len as f32,
                                avgdl,
                                &self.params,
                            )
                        })
                        .sum();
                    let skip = threshold(heap, k).map_or(false, |min| bound < min);
                    (start, (start + BLOCK_SIZE).min(len), skip)
                }
                None => (0, len, false),
            };

            'candidates: for i in start..end {
                let doc_id = driver_list.doc_id(i);
                tfs[driver] = driver_list.term_freq(i);
                for &j in &others {
                    match lists[j].find(doc_id) {
                        Some(tf) => tfs[j] = tf,
                        None => continue 'candidates,
                    }
                }
                matched += 1;
                if skip_scoring {
                    continue;
                }

                let doc_len = stats.get_doc_length(doc_id).unwrap_or(0) as f32;
                let score: f32 = terms
                    .iter()
                    .zip(&tfs)
                    .map(|(t, &tf)| bm25_term_score(t.idf, tf as f32, doc_len, avgdl, &self.params))
                    .sum();
                offer(heap, k, ScoreEntry::new(score, doc_id, source_index));
            }
        }
        Ok(matched)
    }

    /// Documents containing any term; returns the match count
    fn score_disjunction(
        &self,
        source_index: usize,
        source: &dyn SearchSource,
        terms: &[QueryTerm<'_>],
        avgdl: f32,
        k: usize,
        heap: &mut TopK,
    ) -> Result<u64> {
        let stats = source.stats();
        let mut scores: HashMap<DocId, f32> = HashMap::new();

        for term in terms {
            let Some(list) = source.postings(term.term)? else {
                continue;
            };
            for posting in list.iter() {
                let doc_len = stats.get_doc_length(posting.doc_id).unwrap_or(0) as f32;
                *scores.entry(posting.doc_id).or_insert(0.0) += bm25_term_score(
                    term.idf,
                    posting.term_freq as f32,
                    doc_len,
                    avgdl,
                    &self.params,
                );
            }
        }

        let matched = scores.len() as u64;
        for (doc_id, score) in scores {
            offer(heap, k, ScoreEntry::new(score, doc_id, source_index));
        }
        Ok(matched)
    }
}

/// Lowest score in a full heap
fn threshold(heap: &TopK, k: usize) -> Option<f32> {
    if k == 0 || heap.len() < k {
        return None;
    }
    heap.peek().map(|Reverse(entry)| entry.score.0)
}

fn offer(heap: &mut TopK, k: usize, entry: ScoreEntry) {
    if k == 0 {
        return;
    }
    if heap.len() < k {
        heap.push(Reverse(entry));
    } else if let Some(Reverse(min)) = heap.peek() {
        if entry > *min {
            heap.pop();
            heap.push(Reverse(entry));
        }
    }
}
