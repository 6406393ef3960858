//! Point construction: deterministic ids and denormalized payloads.

use crate::chunks::Chunk;
use crate::embedding::sparse::SparseVector;
use crate::identity;
use crate::metadata::BookMetadata;
use crate::qdrant::PointRecord;
use serde_json::json;

/// Derive the deterministic point id for a chunk under the given metadata.
///
/// Identity is a pure function of book name, page number, and chunk text, so
/// re-running the same content yields the same id and reconciliation can
/// recompute the expected id set without consulting the store.
pub fn expected_point_id(chunk: &Chunk, metadata: &BookMetadata) -> String {
    identity::point_id(
        &metadata.book_name,
        chunk.metadata.page_number,
        &chunk.content,
    )
}

/// Assemble a complete point from a chunk, its metadata record, and both
/// vectors. Points are only ever written whole.
pub fn build_point(
    chunk: &Chunk,
    metadata: &BookMetadata,
    dense: Vec<f32>,
    sparse: SparseVector,
) -> PointRecord {
    PointRecord {
        id: expected_point_id(chunk, metadata),
        dense,
        sparse,
        payload: json!({
            "text": chunk.content,
            "book_name": metadata.book_name,
            "author": metadata.author,
            "publish_year": metadata.publish_year,
            "keywords": metadata.keywords,
            "language": metadata.language,
            "page_number": chunk.metadata.page_number,
            "chunk_index": chunk.metadata.chunk_index,
            "source": chunk.metadata.source,
            "doc_id": metadata.doc_id,
        }),
    }
}
