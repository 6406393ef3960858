//! Shared pipeline error taxonomy and run records.

use crate::chunks::ChunkingError;
use crate::embedding::EmbeddingError;
use crate::extract::ExtractError;
use crate::metadata::BookMetadata;
use crate::qdrant::QdrantError;
use crate::split::SplitError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by pipeline phases.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The document is already present in the collection and overwrite was
    /// not requested.
    #[error("Document {doc_id} is already indexed; pass --overwrite to replace it")]
    AlreadyExists {
        /// Content hash of the conflicting document.
        doc_id: String,
    },
    /// A required input file or artifact is missing.
    #[error("Required input not found: {0}")]
    NotFound(PathBuf),
    /// Splitting produced no usable part files.
    #[error("No parts were produced for {0}")]
    NoParts(PathBuf),
    /// Reconciliation could not repair every missing point.
    #[error("{missing} points still missing after reconciliation")]
    Inconsistent {
        /// Number of expected points absent after the repair pass.
        missing: usize,
    },
    /// Splitting the source PDF failed.
    #[error(transparent)]
    Split(#[from] SplitError),
    /// Turning page text into chunks failed.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// The dense embedding provider failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    /// OCR or metadata extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),
    /// The vector store failed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error is the skip-on-conflict signal rather than a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Whether the embedding quota was exhausted past the retry ceiling.
    pub fn is_quota(&self) -> bool {
        matches!(
            self,
            Self::Embedding(EmbeddingError::QuotaExhausted { .. })
        )
    }
}

/// Record of one chunk artifact that went through an indexing run.
///
/// The metadata is pinned at indexing time so reconciliation re-derives the
/// exact ids that were written, even if the artifact on disk changes between
/// indexing and verification.
#[derive(Debug, Clone)]
pub struct ProcessedSource {
    /// Path of the chunk artifact that was indexed.
    pub chunks_path: PathBuf,
    /// Metadata in effect when the points were built.
    pub metadata: BookMetadata,
}

impl ProcessedSource {
    /// Human-readable label for logs, derived from the artifact file name.
    pub fn label(&self) -> String {
        self.chunks_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("chunks")
            .to_string()
    }
}
