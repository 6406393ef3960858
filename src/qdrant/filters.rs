//! Filter builders for document-scoped Qdrant operations.

use serde_json::{Value, json};

/// Build the exact-match filter selecting every point of one source document.
///
/// All document-scoped store operations (skip checks, overwrite deletion,
/// counting) go through this filter so they agree on the payload key.
pub fn doc_id_filter(doc_id: &str) -> Value {
    json!({
        "must": [
            {
                "key": "doc_id",
                "match": { "value": doc_id }
            }
        ]
    })
}
