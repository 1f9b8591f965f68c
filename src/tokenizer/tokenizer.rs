use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use stop_words::{get, LANGUAGE};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::TokenizerConfig;

/// A distinct term produced from one document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    /// Buffer key, never used for ranking
    pub hash: u64,
    /// Occurrences in the document, saturating at `u16::MAX`
    pub frequency: u16,
}

/// Hash used to key the writer buffer
pub fn term_hash(term: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    term.hash(&mut hasher);
    hasher.finish()
}

/// Text tokenizer shared by indexing and querying
pub struct Tokenizer {
    config: TokenizerConfig,
    stemmer: Option<Stemmer>,
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Create a new tokenizer from configuration
    pub fn new(config: &TokenizerConfig) -> Self {
        let stemmer = if config.stem {
            Some(Stemmer::create(Algorithm::English))
        } else {
            None
        };

        let stopwords = if config.remove_stopwords {
            get(LANGUAGE::English)
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect()
        } else {
            HashSet::new()
        };

        Self {
            config: config.clone(),
            stemmer,
            stopwords,
        }
    }

    /// Emit every accepted term in document order
    fn for_each_term<F: FnMut(String)>(&self, text: &str, mut emit: F) {
        let pieces = text
            .unicode_words()
            .flat_map(|word| word.split(|c: char| !c.is_alphanumeric()))
            .filter(|piece| !piece.is_empty());

        for piece in pieces {
            let mut token = if self.config.lowercase {
                piece.to_lowercase()
            } else {
                piece.to_string()
            };

            if token.len() > self.config.max_token_bytes
                || token.chars().count() < self.config.min_token_length
                || self.stopwords.contains(&token)
            {
                continue;
            }

            if let Some(stemmer) = &self.stemmer {
                token = stemmer.stem(&token).into_owned();
            }

            emit(token);
        }
    }

    /// Number of accepted tokens in the text (the BM25 document length)
    pub fn token_count(&self, text: &str) -> u32 {
        let mut count = 0u32;
        self.for_each_term(text, |_| count += 1);
        count
    }

    /// Term frequencies for indexing
    pub fn tokenize(&self, text: &str) -> HashMap<String, u32> {
        let mut freq = HashMap::new();
        self.for_each_term(text, |term| *freq.entry(term).or_insert(0) += 1);
        freq
    }

    /// Distinct tokens with their buffer hash and document length
    pub fn tokens(&self, text: &str) -> (Vec<Token>, u32) {
        let freqs = self.tokenize(text);
        let doc_len = freqs.values().sum();
        let tokens = freqs
            .into_iter()
            .map(|(term, frequency)| Token {
                hash: term_hash(&term),
                frequency: frequency.min(u16::MAX as u32) as u16,
                term,
            })
            .collect();
        (tokens, doc_len)
    }

    /// Distinct query terms in first-occurrence order
    pub fn tokenize_query(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut terms = Vec::new();
        self.for_each_term(text, |term| {
            if seen.insert(term.clone()) {
                terms.push(term);
            }
        });
        terms
    }
}
