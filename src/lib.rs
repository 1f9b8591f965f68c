pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod query;
pub mod segment;
pub mod tokenizer;

pub use cancel::CancelToken;
pub use config::{
    Bm25Params, DictionaryKind, EngineConfig, MergeConfig, PostingProfile, RetrievalMode,
    TokenizerConfig,
};
pub use driver::{
    Driver, DriverInfo, DriverRegistry, EmbeddedDriver, IndexStats, IpcDriver, MmapDriver,
    IpcWorker, SearchHit, SearchResponse,
};
pub use error::{FtsError, Result};
pub use query::{QueryEngine, ScoredDoc, SearchOutcome};
pub use segment::{DocId, Document, SegmentId, SegmentIndex};
pub use tokenizer::Tokenizer;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
