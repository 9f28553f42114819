//! Two-channel retrieval: query both indexes concurrently, fuse, resolve.
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use docrag_core::config::{FusionMode, RetrievalSettings};
use docrag_core::error::{Error, Result};
use docrag_core::traits::{DenseStore, LexicalStore};
use docrag_core::types::{Channel, Chunk, RetrievalHit, ScoredChunk};
use docrag_embed::EmbeddingRouter;
use tracing::{debug, info, warn};

use crate::fusion::{self, Fused, Ranked};

#[derive(Clone)]
pub struct Retriever {
    dense: Arc<dyn DenseStore>,
    lexical: Arc<dyn LexicalStore>,
    router: EmbeddingRouter,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(dense: Arc<dyn DenseStore>, lexical: Arc<dyn LexicalStore>, router: EmbeddingRouter, settings: RetrievalSettings) -> Self {
        Self { dense, lexical, router, settings }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Top-`k` hits for `query`, best first.
    ///
    /// # Errors
    ///
    /// `ChannelUnavailable` when neither channel produced a result. A single
    /// failed channel only degrades the ranking.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let fetch = k.max(self.settings.candidates);
        let query_vector = self.embed_query(query).await;

        let dense_fut = async {
            match query_vector {
                Ok(v) => {
                    let store = Arc::clone(&self.dense);
                    self.bounded(Channel::Dense, async move { store.query(&v, fetch).await }).await
                }
                Err(e) => Err(Error::unavailable(Channel::Dense, e)),
            }
        };
        let store = Arc::clone(&self.lexical);
        let text = query.to_string();
        let lexical_fut = self.bounded(Channel::Lexical, async move { store.search(&text, fetch).await });
        let (dense, lexical) = tokio::join!(dense_fut, lexical_fut);

        let (fused, dense, lexical) = match (dense, lexical) {
            (Ok(d), Ok(l)) => (self.fuse(&d, &l, k), d, l),
            (Ok(d), Err(e)) => {
                warn!(error = %e, "lexical channel unavailable; dense-only ranking");
                (fusion::single(&ranked(&d), Channel::Dense, k), d, Vec::new())
            }
            (Err(e), Ok(l)) => {
                warn!(error = %e, "dense channel unavailable; lexical-only ranking");
                (fusion::single(&ranked(&l), Channel::Lexical, k), Vec::new(), l)
            }
            (Err(d), Err(l)) => {
                return Err(Error::ChannelUnavailable { channel: Channel::Dense, reason: format!("both channels failed ({d}; {l})") });
            }
        };

        let hits = resolve(fused, &dense, &lexical);
        info!(k, dense = dense.len(), lexical = lexical.len(), hits = hits.len(), "retrieved");
        Ok(hits)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let router = self.router.clone();
        let text = query.to_string();
        tokio::task::spawn_blocking(move || router.embed_query(&text))
            .await
            .map_err(|e| Error::Embedding(format!("query embedding task failed: {e}")))?
    }

    /// Runs one channel query as its own task so a store that blocks inside
    /// its future still cannot hold up the other channel or the deadline.
    async fn bounded<F>(&self, channel: Channel, fut: F) -> Result<Vec<ScoredChunk>>
    where
        F: Future<Output = Result<Vec<ScoredChunk>>> + Send + 'static,
    {
        let limit = Duration::from_millis(self.settings.channel_timeout_ms);
        let mut task = tokio::spawn(fut);
        match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(Ok(hits))) => Ok(hits),
            Ok(Ok(Err(e))) => Err(Error::unavailable(channel, e)),
            Ok(Err(join)) => Err(Error::unavailable(channel, format!("query task failed: {join}"))),
            Err(_) => {
                task.abort();
                Err(Error::unavailable(channel, format!("timed out after {limit:?}")))
            }
        }
    }

    fn fuse(&self, dense: &[ScoredChunk], lexical: &[ScoredChunk], k: usize) -> Vec<Fused> {
        let (d, l) = (ranked(dense), ranked(lexical));
        match self.settings.fusion {
            FusionMode::Rrf => fusion::rrf(&d, &l, self.settings.rrf_k, k),
            FusionMode::Blend => fusion::weighted_blend(&d, &l, self.settings.alpha_dense, k),
            FusionMode::Threshold => fusion::threshold(&d, &l, self.settings.alpha_dense, k),
        }
    }
}

fn ranked(hits: &[ScoredChunk]) -> Vec<Ranked> {
    hits.iter().map(|h| Ranked::new(h.chunk.id.clone(), h.score)).collect()
}

/// Dense payloads win over lexical ones for the same id.
fn resolve(fused: Vec<Fused>, dense: &[ScoredChunk], lexical: &[ScoredChunk]) -> Vec<RetrievalHit> {
    let mut payloads: HashMap<&str, &Chunk> = HashMap::new();
    for hit in dense.iter().chain(lexical) {
        payloads.entry(hit.chunk.id.as_str()).or_insert(&hit.chunk);
    }
    fused
        .into_iter()
        .filter_map(|f| match payloads.get(f.id.as_str()) {
            Some(chunk) => Some(RetrievalHit { chunk: (*chunk).clone(), score: f.score as f32, source: f.source }),
            None => {
                debug!(id = %f.id, "dropping unresolvable hit");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docrag_core::types::{ChunkId, ChunkMetadata, ContentKind, HitSource};
    use docrag_embed::HashEmbedder;

    struct FixedDense(Vec<ScoredChunk>);
    struct FixedLexical(Vec<ScoredChunk>);
    struct Broken;
    struct Slow;
    struct Stalling;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: format!("text {id}"),
            kind: ContentKind::Prose,
            source_path: format!("{id}.md"),
            position: 0,
            metadata: ChunkMetadata::default(),
        }
    }

    fn scored(ids: &[&str]) -> Vec<ScoredChunk> {
        ids.iter().enumerate().map(|(i, id)| ScoredChunk { chunk: chunk(id), score: 1.0 - i as f32 * 0.1 }).collect()
    }

    #[async_trait]
    impl DenseStore for FixedDense {
        fn dim(&self) -> usize {
            8
        }
        async fn add(&self, chunks: &[Chunk], _v: &[Vec<f32>]) -> Result<usize> {
            Ok(chunks.len())
        }
        async fn query(&self, _v: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
        async fn remove(&self, _ids: &[ChunkId]) -> Result<()> {
            Ok(())
        }
        async fn count(&self) -> Result<usize> {
            Ok(self.0.len())
        }
    }

    #[async_trait]
    impl LexicalStore for FixedLexical {
        async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
            Ok(chunks.len())
        }
        async fn search(&self, _q: &str, k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(self.0.iter().take(k).cloned().collect())
        }
        async fn count(&self) -> Result<usize> {
            Ok(self.0.len())
        }
    }

    #[async_trait]
    impl LexicalStore for Broken {
        async fn add(&self, _chunks: &[Chunk]) -> Result<usize> {
            Err(Error::IndexWrite("broken".into()))
        }
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<ScoredChunk>> {
            Err(Error::Storage("index missing".into()))
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[async_trait]
    impl DenseStore for Broken {
        fn dim(&self) -> usize {
            8
        }
        async fn add(&self, _c: &[Chunk], _v: &[Vec<f32>]) -> Result<usize> {
            Err(Error::IndexWrite("broken".into()))
        }
        async fn query(&self, _v: &[f32], _k: usize) -> Result<Vec<ScoredChunk>> {
            Err(Error::Storage("table missing".into()))
        }
        async fn remove(&self, _ids: &[ChunkId]) -> Result<()> {
            Ok(())
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[async_trait]
    impl LexicalStore for Slow {
        async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
            Ok(chunks.len())
        }
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<ScoredChunk>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(scored(&["late"]))
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[async_trait]
    impl LexicalStore for Stalling {
        async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
            Ok(chunks.len())
        }
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<ScoredChunk>> {
            // synchronous work inside the future, like an index that never yields
            std::thread::sleep(Duration::from_millis(1500));
            Ok(scored(&["late"]))
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn router() -> EmbeddingRouter {
        EmbeddingRouter::new(Arc::new(HashEmbedder::new(8, 1)), Arc::new(HashEmbedder::new(8, 0))).unwrap()
    }

    fn retriever(dense: Arc<dyn DenseStore>, lexical: Arc<dyn LexicalStore>, fusion: FusionMode) -> Retriever {
        Retriever::new(dense, lexical, router(), RetrievalSettings { fusion, channel_timeout_ms: 200, ..Default::default() })
    }

    fn ids(hits: &[RetrievalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk.id.as_str()).collect()
    }

    #[tokio::test]
    async fn rrf_fuses_both_channels() {
        let r = retriever(
            Arc::new(FixedDense(scored(&["A", "B", "C"]))),
            Arc::new(FixedLexical(scored(&["B", "A", "D"]))),
            FusionMode::Rrf,
        );
        let hits = r.retrieve("what is A", 3).await.unwrap();
        assert_eq!(ids(&hits), vec!["A", "B", "C"]);
        assert_eq!(hits[0].source, HitSource::Fused);
        assert_eq!(hits[2].source, HitSource::Dense);
        assert_eq!(hits[0].chunk.source_path, "A.md");
    }

    #[tokio::test]
    async fn lexical_channel_rescues_chunk_missing_from_dense_candidates() {
        let dense_ids: Vec<String> = (0..16).map(|i| format!("D{i:02}")).collect();
        let dense_refs: Vec<&str> = dense_ids.iter().map(String::as_str).collect();
        let r = retriever(
            Arc::new(FixedDense(scored(&dense_refs))),
            Arc::new(FixedLexical(scored(&["X", "L1", "L2"]))),
            FusionMode::Rrf,
        );
        let hits = r.retrieve("zygomorphic", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        let rescued = hits.iter().find(|h| h.chunk.id == "X").expect("lexical-only chunk is fused in");
        assert_eq!(rescued.source, HitSource::Lexical);
        assert_eq!(ids(&hits), vec!["D00", "X", "D01"]);
    }

    #[tokio::test]
    async fn blank_query_or_zero_k_is_empty() {
        let r = retriever(Arc::new(FixedDense(scored(&["A"]))), Arc::new(FixedLexical(scored(&["A"]))), FusionMode::Rrf);
        assert!(r.retrieve("  ", 5).await.unwrap().is_empty());
        assert!(r.retrieve("A", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_lexical_channel_degrades_to_dense() {
        let r = retriever(Arc::new(FixedDense(scored(&["A", "B"]))), Arc::new(Broken), FusionMode::Rrf);
        let hits = r.retrieve("q", 5).await.unwrap();
        assert_eq!(ids(&hits), vec!["A", "B"]);
        assert!(hits.iter().all(|h| h.source == HitSource::Dense));
        assert!((hits[0].score - 1.0).abs() < 1e-6, "channel-native score");
    }

    #[tokio::test]
    async fn timed_out_lexical_channel_degrades_to_dense() {
        let r = retriever(Arc::new(FixedDense(scored(&["A"]))), Arc::new(Slow), FusionMode::Rrf);
        let hits = r.retrieve("q", 5).await.unwrap();
        assert_eq!(ids(&hits), vec!["A"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_bounds_a_store_that_blocks_its_thread() {
        let r = Retriever::new(
            Arc::new(FixedDense(scored(&["A"]))),
            Arc::new(Stalling),
            router(),
            RetrievalSettings { channel_timeout_ms: 100, ..Default::default() },
        );
        let started = std::time::Instant::now();
        let hits = r.retrieve("q", 5).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1000), "took {:?}", started.elapsed());
        assert_eq!(ids(&hits), vec!["A"]);
    }

    #[tokio::test]
    async fn failed_dense_channel_degrades_to_lexical() {
        let r = retriever(Arc::new(Broken), Arc::new(FixedLexical(scored(&["L1", "L2"]))), FusionMode::Blend);
        let hits = r.retrieve("q", 1).await.unwrap();
        assert_eq!(ids(&hits), vec!["L1"]);
        assert_eq!(hits[0].source, HitSource::Lexical);
    }

    #[tokio::test]
    async fn both_channels_failing_is_an_error() {
        let r = retriever(Arc::new(Broken), Arc::new(Broken), FusionMode::Rrf);
        assert!(matches!(r.retrieve("q", 3).await, Err(Error::ChannelUnavailable { .. })));
    }

    #[tokio::test]
    async fn threshold_mode_uses_one_channel() {
        let r = retriever(
            Arc::new(FixedDense(scored(&["D"]))),
            Arc::new(FixedLexical(scored(&["L"]))),
            FusionMode::Threshold,
        );
        assert_eq!(ids(&r.retrieve("q", 5).await.unwrap()), vec!["D"]);
    }

    #[test]
    fn resolution_prefers_dense_payload() {
        let mut dense_copy = chunk("X");
        dense_copy.text = "dense payload".into();
        let dense = vec![ScoredChunk { chunk: dense_copy, score: 0.9 }];
        let lexical = scored(&["X", "Y"]);
        let fused = vec![
            Fused { id: "X".into(), score: 0.1, source: HitSource::Fused },
            Fused { id: "ghost".into(), score: 0.05, source: HitSource::Dense },
            Fused { id: "Y".into(), score: 0.01, source: HitSource::Lexical },
        ];
        let hits = resolve(fused, &dense, &lexical);
        assert_eq!(ids(&hits), vec!["X", "Y"]);
        assert_eq!(hits[0].chunk.text, "dense payload");
    }
}
