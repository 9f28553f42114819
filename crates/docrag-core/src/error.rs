use thiserror::Error;

use crate::types::Channel;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Cannot ingest {path}: {reason}")]
    IngestionInput { path: String, reason: String },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index write failed: {0}")]
    IndexWrite(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{channel} channel unavailable: {reason}")]
    ChannelUnavailable { channel: Channel, reason: String },

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn index_write(err: impl std::fmt::Display) -> Self {
        Self::IndexWrite(err.to_string())
    }

    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::Embedding(err.to_string())
    }

    pub fn unavailable(channel: Channel, err: impl std::fmt::Display) -> Self {
        Self::ChannelUnavailable { channel, reason: err.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
