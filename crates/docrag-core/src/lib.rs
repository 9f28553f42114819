//! docrag-core
//!
//! Shared data model, error type, configuration, chunking and the storage /
//! embedding / generation traits the other crates implement.
pub mod chunker;
pub mod config;
pub mod error;
pub mod source;
pub mod traits;
pub mod types;

pub use chunker::Chunker;
pub use error::{Error, Result};
pub use types::{Channel, Chunk, ChunkId, ChunkMetadata, ContentKind, HitSource, MetaValue, RetrievalHit, ScoredChunk, SourceDocument};
