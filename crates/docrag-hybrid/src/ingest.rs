//! Ingestion pipeline: sources → chunks → embeddings → dense, then lexical.
use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info};

use docrag_core::chunker::Chunker;
use docrag_core::config::IngestionSettings;
use docrag_core::error::{Error, Result};
use docrag_core::source::SourceLoader;
use docrag_core::traits::{DenseStore, LexicalStore};
use docrag_core::types::{Chunk, ChunkId, SourceDocument};
use docrag_embed::EmbeddingRouter;

pub const DEFAULT_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_seen: usize,
    pub files_skipped: usize,
    pub chunks_produced: usize,
    pub chunks_indexed: usize,
    pub batches: usize,
}

pub struct Ingestor {
    chunker: Chunker,
    router: EmbeddingRouter,
    dense: Arc<dyn DenseStore>,
    lexical: Arc<dyn LexicalStore>,
    batch_size: usize,
    show_progress: bool,
}

impl Ingestor {
    pub fn new(chunker: Chunker, router: EmbeddingRouter, dense: Arc<dyn DenseStore>, lexical: Arc<dyn LexicalStore>) -> Self {
        Self { chunker, router, dense, lexical, batch_size: DEFAULT_BATCH_SIZE, show_progress: false }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Walks `root` and ingests every supported file.
    pub async fn ingest_dir(&self, root: &Path, settings: &IngestionSettings, project_id: &str) -> Result<IngestReport> {
        let loader = SourceLoader::new(root, settings).with_project_id(project_id);
        let loaded = tokio::task::spawn_blocking(move || loader.load())
            .await
            .map_err(|e| Error::Storage(format!("source walk failed: {e}")))?;
        let skipped = loaded.skipped.len();
        let mut report = self.ingest_documents(loaded.documents).await?;
        report.files_seen += skipped;
        report.files_skipped += skipped;
        info!(root = %root.display(), ?report, "ingest finished");
        Ok(report)
    }

    /// Chunks, embeds and indexes `documents`.
    ///
    /// # Errors
    ///
    /// Stops at the first failing batch; earlier batches stay indexed.
    /// `Embedding` when the router rejects a batch, `IndexWrite` when either
    /// store does. Either failure first removes the batch from the dense
    /// store so both stay in step.
    pub async fn ingest_documents(&self, documents: Vec<SourceDocument>) -> Result<IngestReport> {
        let mut report = IngestReport { files_seen: documents.len(), ..Default::default() };
        let chunker = self.chunker.clone();
        let chunks: Vec<Chunk> = tokio::task::spawn_blocking(move || {
            documents.par_iter().flat_map_iter(|doc| chunker.chunk_document(doc)).collect()
        })
        .await
        .map_err(|e| Error::Storage(format!("chunking task failed: {e}")))?;
        report.chunks_produced = chunks.len();
        debug!(chunks = chunks.len(), "chunking done");

        let pb = self.progress_bar(chunks.len() as u64);
        for batch in chunks.chunks(self.batch_size) {
            self.index_batch(batch.to_vec()).await?;
            report.chunks_indexed += batch.len();
            report.batches += 1;
            pb.inc(batch.len() as u64);
        }
        pb.finish_and_clear();
        Ok(report)
    }

    async fn index_batch(&self, batch: Vec<Chunk>) -> Result<()> {
        let router = self.router.clone();
        let (batch, vectors) = tokio::task::spawn_blocking(move || {
            let vectors = router.embed_batch(&batch);
            (batch, vectors)
        })
        .await
        .map_err(|e| Error::Embedding(format!("embedding task failed: {e}")))?;
        let vectors = vectors?;

        // A failed dense write may still have landed rows, so it is undone like a lexical failure.
        if let Err(err) = self.dense.add(&batch, &vectors).await {
            self.undo_dense(&batch).await;
            return Err(as_index_write(err));
        }
        if let Err(err) = self.lexical.add(&batch).await {
            self.undo_dense(&batch).await;
            return Err(as_index_write(err));
        }
        debug!(chunks = batch.len(), "batch indexed");
        Ok(())
    }

    async fn undo_dense(&self, batch: &[Chunk]) {
        let ids: Vec<ChunkId> = batch.iter().map(|c| c.id.clone()).collect();
        if let Err(undo) = self.dense.remove(&ids).await {
            error!(error = %undo, chunks = ids.len(), "dense rollback failed; dense holds chunks missing from lexical");
        }
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

fn as_index_write(err: Error) -> Error {
    match err {
        Error::IndexWrite(_) | Error::DimensionMismatch { .. } => err,
        other => Error::IndexWrite(other.to_string()),
    }
}
