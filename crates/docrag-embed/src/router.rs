//! Routes chunks to the code or prose embedder by content kind.
use std::sync::Arc;

use docrag_core::error::{Error, Result};
use docrag_core::traits::Embedder;
use docrag_core::types::{Chunk, ContentKind};
use tracing::debug;

const NORM_TOLERANCE: f32 = 1e-3;

#[derive(Clone)]
pub struct EmbeddingRouter {
    code: Arc<dyn Embedder>,
    prose: Arc<dyn Embedder>,
    dim: usize,
}

impl std::fmt::Debug for EmbeddingRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingRouter")
            .field("code", &self.code.name())
            .field("prose", &self.prose.name())
            .field("dim", &self.dim)
            .finish()
    }
}

impl EmbeddingRouter {
    /// Both embedders must share one dimension so a single dense index can
    /// hold their vectors.
    pub fn new(code: Arc<dyn Embedder>, prose: Arc<dyn Embedder>) -> Result<Self> {
        let dim = prose.dim();
        if code.dim() != dim {
            return Err(Error::DimensionMismatch { expected: dim, actual: code.dim() });
        }
        Ok(Self { code, prose, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embedder_for(&self, kind: ContentKind) -> &Arc<dyn Embedder> {
        match kind {
            ContentKind::Code => &self.code,
            ContentKind::Prose => &self.prose,
        }
    }

    /// One vector per chunk, in input order. Each embedder is called at most
    /// once per batch; any failure fails the whole batch.
    pub fn embed_batch(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        for kind in [ContentKind::Code, ContentKind::Prose] {
            let indices: Vec<usize> = chunks.iter().enumerate().filter(|(_, c)| c.kind == kind).map(|(i, _)| i).collect();
            if indices.is_empty() {
                continue;
            }
            let embedder = self.embedder_for(kind);
            let texts: Vec<String> = indices.iter().map(|&i| chunks[i].text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).map_err(as_embedding_error)?;
            if vectors.len() != indices.len() {
                return Err(Error::Embedding(format!(
                    "{} returned {} vectors for {} texts",
                    embedder.name(),
                    vectors.len(),
                    indices.len()
                )));
            }
            for (i, v) in indices.into_iter().zip(vectors) {
                self.check_vector(&v)?;
                out[i] = Some(v);
            }
            debug!(%kind, model = embedder.name(), "embedded chunk group");
        }
        out.into_iter()
            .map(|v| v.ok_or_else(|| Error::Embedding("chunk left without a vector".to_string())))
            .collect()
    }

    /// Queries always go through the prose embedder.
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.prose.embed_batch(&[text.to_string()]).map_err(as_embedding_error)?;
        let v = vectors.pop().ok_or_else(|| Error::Embedding("no vector for query".to_string()))?;
        self.check_vector(&v)?;
        Ok(v)
    }

    fn check_vector(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() });
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if (norm - 1.0).abs() > NORM_TOLERANCE {
            return Err(Error::Embedding(format!("vector norm {norm} is not 1")));
        }
        Ok(())
    }
}

fn as_embedding_error(err: Error) -> Error {
    match err {
        Error::Embedding(_) | Error::DimensionMismatch { .. } => err,
        other => Error::Embedding(other.to_string()),
    }
}
