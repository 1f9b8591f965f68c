//! Posting builder
//!
//! Turns sorted term -> postings input into the encoded sections of a
//! segment. Each term's list is independent, so lists are encoded in
//! parallel; the dictionary is built afterwards from the sorted term list.

use std::borrow::Cow;
use std::io;

use rayon::prelude::*;

use crate::config::{Bm25Params, DictionaryKind, PostingProfile};

use super::postings::{encode_posting_list, BlockScoring};
use super::statistics::{idf, SegmentStatistics};
use super::term_dict::{build_fst, TermEntry};
use super::types::{DocId, Posting};

/// Encoded term-related sections of a segment
#[derive(Debug, Default)]
pub struct BuiltPostings {
    /// Fixed-width term entries in ordinal order
    pub entries: Vec<u8>,
    /// Term string offsets followed by the concatenated term bytes
    pub strings: Vec<u8>,
    /// FST bytes (empty for hash dictionaries)
    pub fst: Vec<u8>,
    /// Concatenated encoded posting lists
    pub postings: Vec<u8>,
    pub term_count: u32,
}

/// Encodes posting lists for one profile
#[derive(Clone, Debug)]
pub struct PostingBuilder {
    profile: PostingProfile,
    dictionary: DictionaryKind,
    roaring_min_postings: usize,
    params: Bm25Params,
}

impl PostingBuilder {
    pub fn new(
        profile: PostingProfile,
        dictionary: DictionaryKind,
        roaring_min_postings: usize,
        params: Bm25Params,
    ) -> Self {
        Self {
            profile,
            dictionary,
            roaring_min_postings,
            params,
        }
    }

    pub fn profile(&self) -> PostingProfile {
        self.profile
    }

    pub fn dictionary(&self) -> DictionaryKind {
        self.dictionary
    }

    /// Build all term sections
    ///
    /// `terms` must be sorted by term and free of duplicates. Postings may
    /// arrive unsorted; each list is sorted by doc id before encoding.
    pub fn build(
        &self,
        terms: Vec<(Cow<'_, str>, Cow<'_, [Posting]>)>,
        stats: &SegmentStatistics,
    ) -> io::Result<BuiltPostings> {
        if terms.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "terms must be sorted and distinct",
            ));
        }

        let total_docs = stats.doc_count();
        let avgdl = stats.avgdl() as f32;
        let doc_len = |doc: DocId| stats.get_doc_length(doc).unwrap_or(0);

        let encoded: Vec<(Vec<u8>, u32, f32)> = terms
            .par_iter()
            .map(|(_, postings)| -> io::Result<(Vec<u8>, u32, f32)> {
                let mut postings: Cow<'_, [Posting]> = Cow::Borrowed(postings.as_ref());
                if !postings.windows(2).all(|w| w[0].doc_id < w[1].doc_id) {
                    postings.to_mut().sort_unstable_by_key(|p| p.doc_id);
                }
                let doc_freq = postings.len() as u32;
                let term_idf = idf(doc_freq, total_docs);
                let scoring = BlockScoring {
                    idf: term_idf,
                    avgdl,
                    params: &self.params,
                    doc_len: &doc_len,
                };
                let mut out = Vec::new();
                encode_posting_list(
                    self.profile,
                    &postings,
                    &scoring,
                    self.roaring_min_postings,
                    &mut out,
                )?;
                Ok((out, doc_freq, term_idf))
            })
            .collect::<io::Result<_>>()?;

        let mut built = BuiltPostings {
            term_count: terms.len() as u32,
            ..Default::default()
        };

        let mut string_bytes = Vec::new();
        let mut string_offsets = Vec::with_capacity((terms.len() + 1) * 4);
        for ((term, _), (list, doc_freq, term_idf)) in terms.iter().zip(encoded) {
            let entry = TermEntry {
                posting_offset: built.postings.len() as u64,
                posting_len: list.len() as u32,
                doc_freq,
                idf: term_idf,
            };
            entry.encode(&mut built.entries);
            built.postings.extend_from_slice(&list);

            string_offsets.extend_from_slice(&(string_bytes.len() as u32).to_le_bytes());
            string_bytes.extend_from_slice(term.as_bytes());
        }
        string_offsets.extend_from_slice(&(string_bytes.len() as u32).to_le_bytes());
        built.strings = string_offsets;
        built.strings.extend_from_slice(&string_bytes);

        if self.dictionary == DictionaryKind::Fst {
            built.fst = build_fst(terms.iter().map(|(t, _)| t.as_ref()))?;
        }

        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::postings::PostingView;
    use crate::segment::term_dict::TERM_ENTRY_BYTES;

    fn stats(n: u32) -> SegmentStatistics {
        let mut stats = SegmentStatistics::new();
        for id in 0..n {
            stats.add_document(id, 4, id.to_string());
        }
        stats
    }

    #[test]
    fn test_build_sections() {
        let builder = PostingBuilder::new(
            PostingProfile::Speed,
            DictionaryKind::Fst,
            128,
            Bm25Params::default(),
        );
        let terms = vec![
            (
                Cow::Borrowed("cat"),
                Cow::Owned(vec![Posting::new(2, 1), Posting::new(0, 3)]),
            ),
            (Cow::Borrowed("dog"), Cow::Owned(vec![Posting::new(1, 1)])),
        ];

        let built = builder.build(terms, &stats(3)).unwrap();

        assert_eq!(built.term_count, 2);
        assert_eq!(built.entries.len(), 2 * TERM_ENTRY_BYTES);
        assert!(!built.fst.is_empty());

        let cat = TermEntry::decode(&built.entries[..TERM_ENTRY_BYTES]);
        assert_eq!(cat.doc_freq, 2);
        assert!((cat.idf - idf(2, 3)).abs() < 1e-6);

        let start = cat.posting_offset as usize;
        let view = PostingView::parse(&built.postings[start..start + cat.posting_len as usize])
            .unwrap();
        let docs: Vec<_> = view.iter().map(|p| p.doc_id).collect();
        assert_eq!(docs, vec![0, 2]);
    }

    #[test]
    fn test_hash_dictionary_skips_fst() {
        let builder = PostingBuilder::new(
            PostingProfile::Compact,
            DictionaryKind::Hash,
            128,
            Bm25Params::default(),
        );
        let terms = vec![(Cow::Borrowed("x"), Cow::Owned(vec![Posting::new(0, 1)]))];
        let built = builder.build(terms, &stats(1)).unwrap();
        assert!(built.fst.is_empty());
        assert_eq!(built.term_count, 1);
    }

    #[test]
    fn test_rejects_unsorted_terms() {
        let builder = PostingBuilder::new(
            PostingProfile::Speed,
            DictionaryKind::Fst,
            128,
            Bm25Params::default(),
        );
        let terms = vec![
            (Cow::Borrowed("b"), Cow::Owned(vec![Posting::new(0, 1)])),
            (Cow::Borrowed("a"), Cow::Owned(vec![Posting::new(0, 1)])),
        ];
        assert!(builder.build(terms, &stats(1)).is_err());
    }
}
