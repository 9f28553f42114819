//! Domain types shared by the chunker, both index channels and the retriever.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// Content discriminator. Drives both the chunking policy and the embedding model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Code,
    Prose,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Prose => "prose",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "prose" | "text" => Ok(Self::Prose),
            other => Err(Error::InvalidConfig(format!("unknown content kind '{other}'"))),
        }
    }
}

/// One of the two independently scored search channels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Dense,
    Lexical,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense => f.write_str("dense"),
            Self::Lexical => f.write_str("lexical"),
        }
    }
}

/// Where a retrieval score came from. Scores are only comparable within one source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Dense,
    Lexical,
    Fused,
}

impl From<Channel> for HitSource {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Dense => Self::Dense,
            Channel::Lexical => Self::Lexical,
        }
    }
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dense => f.write_str("dense"),
            Self::Lexical => f.write_str("lexical"),
            Self::Fused => f.write_str("fused"),
        }
    }
}

/// Scalar value allowed in the opaque metadata extension map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Well-known optional fields plus a pass-through extension map.
///
/// Both indexes store this as a JSON string and hand it back untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_ts: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, MetaValue>,
}

impl ChunkMetadata {
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Blank strings come back as default metadata so rows written without
    /// metadata still resolve.
    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// The atomic retrievable unit.
///
/// - `id`: assigned once at creation, keys the chunk in both indexes
/// - `position`: word offset for prose, line offset for code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub kind: ContentKind,
    pub source_path: String,
    pub position: usize,
    pub metadata: ChunkMetadata,
}

/// A chunk returned by one channel together with that channel's native score
/// (higher is better).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    pub score: f32,
    pub source: HitSource,
}

/// Extracted text handed to the chunker by a source loader.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub kind: ContentKind,
    pub text: String,
    pub metadata: ChunkMetadata,
}
