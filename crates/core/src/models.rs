use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::IngestError;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 10;

/// Text of one PDF page. `index` is zero-based in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub index: u32,
    pub text: String,
}

impl PageRecord {
    pub fn new(index: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub page: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub ordinal: u64,
    pub content: String,
    pub metadata: ChunkMetadata,
}

pub fn chunk_id(filename: &str, ordinal: u64) -> String {
    format!("{filename}_{ordinal}")
}

/// A chunk together with its embedding, as persisted by a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub ordinal: u64,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl IndexEntry {
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            ordinal: chunk.ordinal,
            vector,
            content: chunk.content,
            metadata: chunk.metadata,
        }
    }

    pub fn to_stored(&self) -> StoredChunk {
        StoredChunk {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// One step of ingestion progress, serialized as `{"status": ..., "message": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum ProgressEvent {
    Info(String),
    Success(String),
    Error(String),
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self::Info(message.into())
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::Success(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Info(message) | Self::Success(message) | Self::Error(message) => message,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Info(_) => false,
            Self::Success(_) | Self::Error(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl IngestionOptions {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub ok: bool,
    pub message: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub total_entries: usize,
    pub sources: Vec<String>,
    pub dimension: Option<usize>,
    pub updated_at: Option<DateTime<Utc>>,
    pub peek: Vec<StoredChunk>,
}
