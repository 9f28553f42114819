use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Chunk, ChunkId, ScoredChunk};

/// A pure `text -> unit-norm vector` function of fixed dimension.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the backing model, used in logs.
    fn name(&self) -> &str;
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Similarity search store over embedding vectors.
#[async_trait]
pub trait DenseStore: Send + Sync {
    fn dim(&self) -> usize;
    /// Upsert by chunk id. `vectors[i]` belongs to `chunks[i]`.
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize>;
    /// Nearest entries by similarity, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;
    async fn remove(&self, ids: &[ChunkId]) -> Result<()>;
    async fn count(&self) -> Result<usize>;
}

/// Inverted-index term search store.
#[async_trait]
pub trait LexicalStore: Send + Sync {
    /// Adds the whole batch in one commit; nothing is visible if it fails.
    async fn add(&self, chunks: &[Chunk]) -> Result<usize>;
    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>>;
    async fn count(&self) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub context: String,
    pub query: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Answer-generation backend fed with the assembled context.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}
