use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FtsError, Result};

/// Tokenizer configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub lowercase: bool,
    pub remove_stopwords: bool,
    pub stem: bool,
    pub min_token_length: usize,
    /// Tokens longer than this (in bytes) are dropped
    pub max_token_bytes: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            lowercase: true,
            remove_stopwords: false,
            stem: false,
            min_token_length: 1,
            max_token_bytes: 100,
        }
    }
}

/// BM25 parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term frequency saturation parameter
    pub k1: f32,
    /// Length normalization parameter
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Posting list representation written by the posting builder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingProfile {
    /// Plain doc id / frequency arrays
    Speed,
    /// Arrays plus 128-posting block-max metadata and a Roaring bitmap
    #[default]
    Balanced,
    /// Elias-Fano encoded doc ids
    Compact,
}

impl PostingProfile {
    /// On-disk tag for this profile
    pub fn tag(&self) -> u8 {
        match self {
            PostingProfile::Speed => 0,
            PostingProfile::Balanced => 1,
            PostingProfile::Compact => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PostingProfile::Speed),
            1 => Some(PostingProfile::Balanced),
            2 => Some(PostingProfile::Compact),
            _ => None,
        }
    }

    /// Whether lists carry per-block max-score metadata
    pub fn block_metadata(&self) -> bool {
        matches!(self, PostingProfile::Balanced)
    }

    /// Whether lists may carry a Roaring bitmap of their doc ids
    pub fn roaring(&self) -> bool {
        matches!(self, PostingProfile::Balanced)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostingProfile::Speed => "speed",
            PostingProfile::Balanced => "balanced",
            PostingProfile::Compact => "compact",
        }
    }
}

impl std::str::FromStr for PostingProfile {
    type Err = FtsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "speed" => Ok(PostingProfile::Speed),
            "balanced" => Ok(PostingProfile::Balanced),
            "compact" => Ok(PostingProfile::Compact),
            other => Err(FtsError::InvalidRequest(format!(
                "unknown posting profile '{}'",
                other
            ))),
        }
    }
}

/// Term dictionary backing a segment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DictionaryKind {
    /// Finite state transducer, smallest footprint
    #[default]
    Fst,
    /// Hash map rebuilt on open, fastest ingestion
    Hash,
}

impl DictionaryKind {
    pub fn tag(&self) -> u8 {
        match self {
            DictionaryKind::Fst => 0,
            DictionaryKind::Hash => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(DictionaryKind::Fst),
            1 => Some(DictionaryKind::Hash),
            _ => None,
        }
    }
}

/// How multi-term queries select candidate documents
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// A document must contain every query term
    #[default]
    And,
    /// A document must contain at least one query term
    Or,
}

/// Background merge configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    pub enabled: bool,
    /// Segments per level that trigger a merge into the next level
    pub segments_per_level: usize,
    /// Number of levels (segments at the last level are never merged)
    pub max_levels: u8,
    /// Idle poll interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            segments_per_level: 4,
            max_levels: 4,
            poll_interval_ms: 100,
        }
    }
}

impl MergeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Segment directory; `None` keeps sealed segments in memory only
    pub data_dir: Option<PathBuf>,
    /// Buffered document count that triggers an automatic flush
    pub flush_threshold: usize,
    pub profile: PostingProfile,
    pub dictionary: DictionaryKind,
    pub retrieval: RetrievalMode,
    /// Minimum list length before a Roaring bitmap is attached
    pub roaring_min_postings: usize,
    pub tokenizer: TokenizerConfig,
    pub bm25: Bm25Params,
    pub merge: MergeConfig,
    /// Threads used for tokenization and posting construction
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            flush_threshold: 65_536,
            profile: PostingProfile::default(),
            dictionary: DictionaryKind::default(),
            retrieval: RetrievalMode::default(),
            roaring_min_postings: 128,
            tokenizer: TokenizerConfig::default(),
            bm25: Bm25Params::default(),
            merge: MergeConfig::default(),
            worker_threads: num_cpus::get(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration persisting segments under `data_dir`
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: Some(data_dir.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| FtsError::InvalidRequest(format!("invalid config: {}", e)))
    }

    pub fn with_profile(mut self, profile: PostingProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_dictionary(mut self, dictionary: DictionaryKind) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalMode) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    pub fn with_merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: TokenizerConfig) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let config = EngineConfig::default();
        assert_eq!(config.flush_threshold, 65_536);
        assert_eq!(config.profile, PostingProfile::Balanced);
        assert_eq!(config.retrieval, RetrievalMode::And);
        assert_eq!(config.merge.segments_per_level, 4);
        assert_eq!(config.merge.max_levels, 4);
        assert_eq!(config.merge.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.bm25, Bm25Params { k1: 1.2, b: 0.75 });

        let tokenizer = TokenizerConfig::default();
        assert!(tokenizer.lowercase);
        assert!(!tokenizer.remove_stopwords);
        assert_eq!(tokenizer.max_token_bytes, 100);
    }

    #[test]
    fn test_profiles() {
        assert!(PostingProfile::Balanced.block_metadata());
        assert!(!PostingProfile::Speed.block_metadata());
        assert!(!PostingProfile::Compact.roaring());

        for profile in [
            PostingProfile::Speed,
            PostingProfile::Balanced,
            PostingProfile::Compact,
        ] {
            assert_eq!(PostingProfile::from_tag(profile.tag()), Some(profile));
            assert_eq!(profile.as_str().parse::<PostingProfile>().unwrap(), profile);
        }
        assert!("turbo".parse::<PostingProfile>().is_err());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new("/tmp/idx")
            .with_profile(PostingProfile::Compact)
            .with_dictionary(DictionaryKind::Hash)
            .with_retrieval(RetrievalMode::Or)
            .with_flush_threshold(0)
            .with_worker_threads(2);

        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/idx")));
        assert_eq!(config.profile, PostingProfile::Compact);
        assert_eq!(config.dictionary, DictionaryKind::Hash);
        assert_eq!(config.retrieval, RetrievalMode::Or);
        assert_eq!(config.flush_threshold, 1);
        assert_eq!(config.worker_threads, 2);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig::default().with_profile(PostingProfile::Speed);
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();

        let loaded = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.profile, PostingProfile::Speed);
        assert_eq!(loaded.flush_threshold, config.flush_threshold);
    }
}
