mod tokenizer;

pub use tokenizer::{term_hash, Token, Tokenizer};
