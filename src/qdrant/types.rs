//! Shared types used by the Qdrant client.

use crate::embedding::sparse::SparseVector;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
}

/// Fully built point ready for upsert: deterministic id, both vectors, and
/// the denormalized payload. A point is only ever written whole.
#[derive(Debug, Clone)]
pub struct PointRecord {
    /// Deterministic point identifier.
    pub id: String,
    /// Dense embedding vector.
    pub dense: Vec<f32>,
    /// Sparse BM25 term weights.
    pub sparse: SparseVector,
    /// Payload stored alongside the vectors.
    pub payload: Value,
}

#[derive(Deserialize)]
pub(crate) struct CountResponse {
    pub(crate) result: CountResult,
}

#[derive(Deserialize)]
pub(crate) struct CountResult {
    pub(crate) count: u64,
}

#[derive(Deserialize)]
pub(crate) struct RetrieveResponse {
    pub(crate) result: Vec<RetrievedPoint>,
}

#[derive(Deserialize)]
pub(crate) struct RetrievedPoint {
    pub(crate) id: Value,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfoResult,
}

#[derive(Deserialize)]
pub(crate) struct CollectionInfoResult {
    #[serde(default)]
    pub(crate) points_count: Option<u64>,
}
