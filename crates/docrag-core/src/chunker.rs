//! Kind-aware windowing of extracted text into overlapping chunks.
//!
//! Prose is windowed over whitespace tokens, code over lines. Consecutive
//! windows share `overlap` units; when the overlap is not smaller than the
//! window the chunker advances by a full window so it always terminates.
use uuid::Uuid;

use crate::config::ChunkingSettings;
use crate::types::{Chunk, ChunkMetadata, ContentKind, SourceDocument};

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingSettings,
}

impl Chunker {
    pub fn new(config: ChunkingSettings) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkingSettings {
        &self.config
    }

    pub fn chunk(&self, text: &str, source_path: &str, kind: ContentKind) -> Vec<Chunk> {
        self.chunk_with_metadata(text, source_path, kind, &ChunkMetadata::default())
    }

    pub fn chunk_document(&self, doc: &SourceDocument) -> Vec<Chunk> {
        self.chunk_with_metadata(&doc.text, &doc.path, doc.kind, &doc.metadata)
    }

    fn chunk_with_metadata(&self, text: &str, source_path: &str, kind: ContentKind, metadata: &ChunkMetadata) -> Vec<Chunk> {
        let (units, size, overlap, sep): (Vec<&str>, usize, usize, &str) = match kind {
            ContentKind::Prose => (
                text.split_whitespace().collect(),
                self.config.prose.max_tokens,
                self.config.prose.overlap_tokens,
                " ",
            ),
            ContentKind::Code => (text.lines().collect(), self.config.code.max_lines, self.config.code.overlap_lines, "\n"),
        };

        window_bounds(units.len(), size, overlap)
            .into_iter()
            .filter_map(|(start, end)| {
                let body = units[start..end].join(sep);
                if body.trim().is_empty() {
                    return None;
                }
                Some(make_chunk(body, kind, source_path, start, metadata))
            })
            .collect()
    }
}

fn make_chunk(text: String, kind: ContentKind, source_path: &str, position: usize, metadata: &ChunkMetadata) -> Chunk {
    let mut metadata = metadata.clone();
    metadata.content_hash = Some(blake3::hash(text.as_bytes()).to_hex().to_string());
    Chunk {
        id: Uuid::new_v4().to_string(),
        text,
        kind,
        source_path: source_path.to_string(),
        position,
        metadata,
    }
}

/// Half-open `(start, end)` windows over `len` units.
///
/// The window that reaches `len` is the last one, so coverage is contiguous
/// and no window is empty.
pub fn window_bounds(len: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let size = size.max(1);
    let advance = if overlap < size { size - overlap } else { size };
    let mut bounds = Vec::with_capacity(len / advance + 1);
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        bounds.push((start, end));
        if end == len {
            break;
        }
        start += advance;
    }
    bounds
}
