//! docrag-hybrid
//!
//! Ties the stores together: ingestion into both channels, fused retrieval,
//! context assembly and answer generation.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use docrag_core::chunker::Chunker;
use docrag_core::config::{IndexLayout, Settings};
use docrag_core::error::{Error, Result};
use docrag_core::traits::{DenseStore, Generator, LexicalStore};
use docrag_core::types::RetrievalHit;
use docrag_embed::{build_router, EmbeddingRouter};
use docrag_text::LexicalIndex;
use docrag_vector::DenseIndex;

pub mod assistant;
pub mod context;
pub mod fusion;
pub mod generate;
pub mod ingest;
pub mod retriever;

pub use assistant::{Answer, Assistant, Citation};
pub use context::ContextAssembler;
pub use generate::{build_generator, NoneGenerator, OllamaGenerator};
pub use ingest::{IngestReport, Ingestor};
pub use retriever::Retriever;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct IndexStats {
    pub dense: usize,
    pub lexical: usize,
}

/// Owns one project's index handles and embedding router.
pub struct HybridEngine {
    settings: Settings,
    base_dir: PathBuf,
    layout: IndexLayout,
    dense: Arc<DenseIndex>,
    lexical: Arc<LexicalIndex>,
    router: EmbeddingRouter,
}

impl HybridEngine {
    /// Builds the configured embedders, then opens (or creates) both stores.
    pub async fn open(settings: Settings, base_dir: &Path) -> Result<Self> {
        settings.validate()?;
        let embedding = settings.embedding.clone();
        let dir = base_dir.to_path_buf();
        let router = tokio::task::spawn_blocking(move || build_router(&embedding, &dir))
            .await
            .map_err(|e| Error::Embedding(format!("embedder startup failed: {e}")))??;
        Self::open_with_router(settings, base_dir, router).await
    }

    pub async fn open_with_router(settings: Settings, base_dir: &Path, router: EmbeddingRouter) -> Result<Self> {
        settings.validate()?;
        if router.dim() != settings.embedding.dim {
            return Err(Error::DimensionMismatch { expected: settings.embedding.dim, actual: router.dim() });
        }
        let layout = settings.layout(base_dir);
        let dense = Arc::new(DenseIndex::open(layout.dense_dir(), settings.embedding.dim).await?);
        let lexical = Arc::new(LexicalIndex::open(layout.lexical_dir(), settings.lexical.writer_memory_bytes)?);
        info!(project = %settings.project.id, root = %layout.root().display(), "engine opened");
        Ok(Self { settings, base_dir: base_dir.to_path_buf(), layout, dense, lexical, router })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(Chunker::new(self.settings.chunking.clone()), self.router.clone(), self.dense.clone(), self.lexical.clone())
            .with_batch_size(self.settings.ingestion.batch_size)
    }

    /// Ingests `root`, or the configured project root when `None`.
    pub async fn ingest(&self, root: Option<&Path>, show_progress: bool) -> Result<IngestReport> {
        let root = match root {
            Some(r) => r.to_path_buf(),
            None => docrag_core::config::resolve_with_base(&self.base_dir, &self.settings.project.root_dir),
        };
        if !root.is_dir() {
            return Err(Error::NotFound(format!("source root {}", root.display())));
        }
        self.ingestor()
            .with_progress(show_progress)
            .ingest_dir(&root, &self.settings.ingestion, &self.settings.project.id)
            .await
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(self.dense.clone(), self.lexical.clone(), self.router.clone(), self.settings.retrieval.clone())
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        self.retriever().retrieve(query, k).await
    }

    pub fn assistant(&self, generator: Arc<dyn Generator>) -> Assistant {
        Assistant::new(self.retriever(), generator, &self.settings)
    }

    /// Removes every entry from both stores.
    pub async fn reset(&self) -> Result<()> {
        self.dense.clear().await?;
        self.lexical.clear().await?;
        info!(project = %self.settings.project.id, "indexes cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats { dense: self.dense.count().await?, lexical: self.lexical.count().await? })
    }
}
