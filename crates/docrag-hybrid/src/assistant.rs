use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use docrag_core::config::Settings;
use docrag_core::error::Result;
use docrag_core::traits::{GenerationRequest, Generator};
use docrag_core::types::RetrievalHit;

use crate::context::ContextAssembler;
use crate::retriever::Retriever;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Citation {
    pub source_path: String,
    pub position: usize,
    pub score: f32,
}

impl From<&RetrievalHit> for Citation {
    fn from(hit: &RetrievalHit) -> Self {
        Self { source_path: hit.chunk.source_path.clone(), position: hit.chunk.position, score: hit.score }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub hits: Vec<Citation>,
}

/// Retrieve, assemble, generate.
pub struct Assistant {
    retriever: Retriever,
    assembler: ContextAssembler,
    generator: Arc<dyn Generator>,
    system_prompt: String,
    top_k: usize,
    max_tokens: u32,
    temperature: f32,
}

impl Assistant {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>, settings: &Settings) -> Self {
        Self {
            retriever,
            assembler: ContextAssembler::new(settings.context.token_budget),
            generator,
            system_prompt: settings.prompting.system_message.clone(),
            top_k: settings.retrieval.top_k,
            max_tokens: settings.llm.max_output_tokens,
            temperature: settings.llm.temperature,
        }
    }

    pub async fn ask(&self, query: &str) -> Result<Answer> {
        let hits = self.retriever.retrieve(query, self.top_k).await?;
        let (context, kept) = self.assembler.pack(query, &hits);
        if kept < hits.len() {
            debug!(kept, dropped = hits.len() - kept, "uncited hits left out of the context");
        }
        let request = GenerationRequest {
            system_prompt: self.system_prompt.clone(),
            context,
            query: query.to_string(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        let answer = self.generator.generate(&request).await?;
        info!(generator = self.generator.name(), hits = kept, "answered");
        Ok(Answer { answer, hits: hits[..kept].iter().map(Citation::from).collect() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docrag_core::traits::{DenseStore, LexicalStore};
    use docrag_core::types::{Chunk, ChunkId, ChunkMetadata, ContentKind, ScoredChunk};
    use docrag_embed::{EmbeddingRouter, HashEmbedder};

    use crate::generate::NoneGenerator;

    struct Docs(Vec<ScoredChunk>);

    fn doc(id: &str, words: usize) -> ScoredChunk {
        let chunk = Chunk {
            id: id.into(),
            text: vec!["word"; words].join(" "),
            kind: ContentKind::Prose,
            source_path: format!("{id}.md"),
            position: 0,
            metadata: ChunkMetadata::default(),
        };
        ScoredChunk { chunk, score: 0.9 }
    }

    #[async_trait]
    impl DenseStore for Docs {
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
    impl LexicalStore for Docs {
        async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
            Ok(chunks.len())
        }
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn citations_cover_only_rendered_sections() {
        let router = EmbeddingRouter::new(Arc::new(HashEmbedder::new(8, 1)), Arc::new(HashEmbedder::new(8, 0))).unwrap();
        let mut settings = Settings::default();
        settings.context.token_budget = 40;
        let retriever = Retriever::new(
            Arc::new(Docs(vec![doc("a", 10), doc("b", 100), doc("c", 5)])),
            Arc::new(Docs(Vec::new())),
            router,
            settings.retrieval.clone(),
        );
        let assistant = Assistant::new(retriever, Arc::new(NoneGenerator), &settings);

        let answer = assistant.ask("word").await.unwrap();
        assert_eq!(answer.hits.len(), 1);
        assert_eq!(answer.hits[0].source_path, "a.md");
        assert!(!answer.answer.contains("[Source 2]"));
    }
}
