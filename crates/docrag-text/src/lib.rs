//! docrag-text
//!
//! Tantivy-backed lexical channel: a persistent BM25 index over chunk text
//! with stopword-aware tokenization.
pub mod index;
pub mod tantivy_utils;

pub use index::LexicalIndex;
