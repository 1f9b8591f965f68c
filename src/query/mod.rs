//! Ranked retrieval over the buffer and sealed segments
//!
//! Queries are bags of terms scored with BM25. `RetrievalMode` decides
//! whether a document must contain every term or any of them.

mod engine;
mod source;
mod types;

pub use engine::QueryEngine;
pub use source::SearchSource;
pub use types::{ScoredDoc, SearchOutcome};
