//! Qdrant vector store integration.
//!
//! The pipeline consumes Qdrant as an opaque store through six operations:
//! collection existence/creation, batched upsert, count by filter, delete by
//! filter, and retrieve by id.

pub mod client;
pub mod filters;
pub mod types;

pub use client::QdrantClient;
pub use filters::doc_id_filter;
pub use types::{PointRecord, QdrantError};
