//! Persistent BM25 index over chunk text.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::{debug, info, warn};

use docrag_core::error::{Error, Result};
use docrag_core::traits::LexicalStore;
use docrag_core::types::{Chunk, ChunkMetadata, ContentKind, ScoredChunk};

use crate::tantivy_utils::{
    build_schema, register_tokenizer, FIELD_ID, FIELD_KIND, FIELD_METADATA, FIELD_POSITION, FIELD_SOURCE_PATH, FIELD_TEXT,
};

/// Tantivy refuses smaller per-thread arenas.
const MIN_WRITER_MEMORY: usize = 15_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    source_path: Field,
    position: Field,
    kind: Field,
    text: Field,
    metadata: Field,
}

impl Fields {
    fn resolve(index: &Index) -> Result<Self> {
        let schema = index.schema();
        let get = |name: &str| schema.get_field(name).map_err(Error::storage);
        Ok(Self {
            id: get(FIELD_ID)?,
            source_path: get(FIELD_SOURCE_PATH)?,
            position: get(FIELD_POSITION)?,
            kind: get(FIELD_KIND)?,
            text: get(FIELD_TEXT)?,
            metadata: get(FIELD_METADATA)?,
        })
    }
}

/// Cheap to clone; clones share one index, reader and writer.
///
/// Tantivy calls block, so the [`LexicalStore`] methods run them on the
/// blocking pool and the returned futures can be cancelled by a timeout.
#[derive(Clone)]
pub struct LexicalIndex {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    index: Index,
    reader: IndexReader,
    fields: Fields,
    writer_memory: usize,
    // Created on first write so read-only handles never take the directory lock.
    writer: Mutex<Option<IndexWriter>>,
}

impl LexicalIndex {
    /// Opens the index in `dir`, creating it if absent. Existing documents
    /// are searchable immediately.
    pub fn open(dir: impl Into<PathBuf>, writer_memory: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let directory = MmapDirectory::open(&dir).map_err(Error::storage)?;
        let index = Index::open_or_create(directory, build_schema()).map_err(Error::storage)?;
        register_tokenizer(&index);
        let fields = Fields::resolve(&index)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(Error::storage)?;
        let inner = Inner { dir, index, reader, fields, writer_memory: writer_memory.max(MIN_WRITER_MEMORY), writer: Mutex::new(None) };
        info!(dir = %inner.dir.display(), docs = inner.num_docs(), "lexical index opened");
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn num_docs(&self) -> usize {
        self.inner.num_docs()
    }

    /// Upserts by id and commits once. On failure the batch is rolled back
    /// and nothing from it becomes visible. Blocks the calling thread.
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        self.inner.index_chunks(chunks)
    }

    /// BM25 top-`k`, best first. Query syntax errors are tolerated; a blank
    /// query or `k == 0` returns nothing. Blocks the calling thread.
    pub fn search_chunks(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        self.inner.search_chunks(query, k)
    }

    /// Drops every document. Used when re-ingesting from scratch.
    pub async fn clear(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.clear()).await
    }
}

impl Inner {
    fn num_docs(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    fn index_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut guard = self.writer.lock().map_err(|_| Error::IndexWrite("lexical writer lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.index.writer(self.writer_memory).map_err(Error::index_write)?);
        }
        let Some(writer) = guard.as_mut() else {
            return Err(Error::IndexWrite("lexical writer unavailable".to_string()));
        };

        let batch = last_occurrence_per_id(chunks);
        let staged = self.stage(writer, &batch);
        let committed = staged.and_then(|_| writer.commit().map_err(Error::index_write));
        if let Err(err) = committed {
            warn!(error = %err, "lexical batch failed; rolling back");
            if let Err(rollback_err) = writer.rollback() {
                warn!(error = %rollback_err, "lexical rollback failed");
            }
            return Err(match err {
                Error::IndexWrite(_) => err,
                other => Error::IndexWrite(other.to_string()),
            });
        }
        self.reader.reload().map_err(Error::storage)?;
        debug!(added = batch.len(), "lexical batch committed");
        Ok(batch.len())
    }

    fn stage(&self, writer: &mut IndexWriter, batch: &[&Chunk]) -> Result<()> {
        let f = self.fields;
        for c in batch {
            let metadata = c.metadata.to_json()?;
            writer.delete_term(Term::from_field_text(f.id, &c.id));
            let doc = doc!(
                f.id => c.id.clone(),
                f.source_path => c.source_path.clone(),
                f.position => c.position as u64,
                f.kind => c.kind.as_str().to_string(),
                f.text => c.text.clone(),
                f.metadata => metadata,
            );
            writer.add_document(doc).map_err(Error::index_write)?;
        }
        Ok(())
    }

    fn search_chunks(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.fields.text]);
        let (q, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(query, errors = errors.len(), "lenient query parse dropped clauses");
        }
        let top_docs = searcher.search(&q, &TopDocs::with_limit(k)).map_err(Error::storage)?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr).map_err(Error::storage)?;
            hits.push(ScoredChunk { chunk: self.chunk_from_doc(&doc)?, score });
        }
        Ok(hits)
    }

    fn clear(&self) -> Result<()> {
        let mut guard = self.writer.lock().map_err(|_| Error::IndexWrite("lexical writer lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.index.writer(self.writer_memory).map_err(Error::index_write)?);
        }
        if let Some(writer) = guard.as_mut() {
            writer.delete_all_documents().map_err(Error::index_write)?;
            writer.commit().map_err(Error::index_write)?;
        }
        self.reader.reload().map_err(Error::storage)?;
        Ok(())
    }

    fn chunk_from_doc(&self, doc: &TantivyDocument) -> Result<Chunk> {
        let f = self.fields;
        let text_of = |field: Field| doc.get_first(field).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let id = text_of(f.id);
        if id.is_empty() {
            return Err(Error::Storage("lexical document without id".to_string()));
        }
        let kind: ContentKind = text_of(f.kind).parse()?;
        let position = doc.get_first(f.position).and_then(|v| v.as_u64()).unwrap_or_default() as usize;
        Ok(Chunk {
            id,
            text: text_of(f.text),
            kind,
            source_path: text_of(f.source_path),
            position,
            metadata: ChunkMetadata::from_json(&text_of(f.metadata))?,
        })
    }
}

/// Later duplicates of an id win, matching upsert semantics.
fn last_occurrence_per_id(chunks: &[Chunk]) -> Vec<&Chunk> {
    let last: HashMap<&str, usize> = chunks.iter().enumerate().map(|(i, c)| (c.id.as_str(), i)).collect();
    chunks.iter().enumerate().filter(|(i, c)| last.get(c.id.as_str()) == Some(i)).map(|(_, c)| c).collect()
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| Error::Storage(format!("lexical task failed: {e}")))?
}

#[async_trait]
impl LexicalStore for LexicalIndex {
    async fn add(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let inner = Arc::clone(&self.inner);
        let chunks = chunks.to_vec();
        run_blocking(move || inner.index_chunks(&chunks)).await
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let query = query.to_string();
        run_blocking(move || inner.search_chunks(&query, k)).await
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.num_docs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            id: id.into(),
            text: String::new(),
            kind: ContentKind::Prose,
            source_path: String::new(),
            position: 0,
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let mut b = chunk("a");
        b.position = 9;
        let chunks = vec![chunk("a"), chunk("x"), b];
        let kept = last_occurrence_per_id(&chunks);
        assert_eq!(kept.iter().map(|c| (c.id.as_str(), c.position)).collect::<Vec<_>>(), vec![("x", 0), ("a", 9)]);
    }
}
