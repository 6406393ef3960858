//! Post-indexing verification and repair.
//!
//! After an indexing run, every expected point id is re-derived from the
//! chunk artifacts and the metadata pinned at indexing time, then checked
//! against the store in fixed-size retrieve batches. Missing points are
//! re-driven through the indexer, grouped per book so each group reuses its
//! own metadata.

use crate::chunks::{Chunk, load_chunks};
use crate::pipeline::indexer::Indexer;
use crate::pipeline::points::expected_point_id;
use crate::pipeline::types::{PipelineError, ProcessedSource};
use std::collections::{BTreeMap, HashSet};

/// Number of ids checked per retrieve request.
pub const RETRIEVE_BATCH_SIZE: usize = 1000;

/// Outcome of one verify-and-repair pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids the indexing run should have produced.
    pub expected: usize,
    /// Ids absent from the store before repair.
    pub missing: usize,
    /// Points successfully rewritten during repair.
    pub reindexed: usize,
    /// Points still absent after repair.
    pub still_missing: usize,
}

impl ReconcileReport {
    /// Whether the collection holds every expected point.
    pub fn is_consistent(&self) -> bool {
        self.still_missing == 0
    }
}

/// Verifies an indexing run against the store and repairs gaps.
pub struct Reconciler<'a> {
    indexer: &'a Indexer,
    retrieve_batch_size: usize,
}

impl<'a> Reconciler<'a> {
    /// Construct a reconciler re-driving repairs through `indexer`.
    pub fn new(indexer: &'a Indexer) -> Self {
        Self {
            indexer,
            retrieve_batch_size: RETRIEVE_BATCH_SIZE,
        }
    }

    #[cfg(test)]
    fn with_batch_size(indexer: &'a Indexer, retrieve_batch_size: usize) -> Self {
        Self {
            indexer,
            retrieve_batch_size,
        }
    }

    /// Re-derive every expected point id, check presence, and re-index the
    /// missing ones. A failing retrieve batch counts all of its ids missing
    /// rather than silently passing verification.
    pub async fn verify_and_repair(
        &self,
        sources: &[ProcessedSource],
    ) -> Result<ReconcileReport, PipelineError> {
        // (id, source index, chunk) in derivation order.
        let mut expected: Vec<(String, usize, Chunk)> = Vec::new();
        for (source_index, source) in sources.iter().enumerate() {
            let chunks = load_chunks(&source.chunks_path)
                .map_err(|_| PipelineError::NotFound(source.chunks_path.clone()))?;
            for chunk in chunks {
                if chunk.content.trim().is_empty() {
                    continue;
                }
                let id = expected_point_id(&chunk, &source.metadata);
                expected.push((id, source_index, chunk));
            }
        }

        let mut report = ReconcileReport {
            expected: expected.len(),
            ..ReconcileReport::default()
        };
        if expected.is_empty() {
            return Ok(report);
        }

        let ids: Vec<String> = expected.iter().map(|(id, _, _)| id.clone()).collect();
        let mut found: HashSet<String> = HashSet::new();
        let store = self.indexer.store();
        let collection = self.indexer.collection();
        for batch in ids.chunks(self.retrieve_batch_size) {
            match store.retrieve_ids(collection, batch).await {
                Ok(present) => found.extend(present),
                Err(err) => {
                    tracing::warn!(
                        batch_size = batch.len(),
                        error = %err,
                        "Retrieve batch failed; treating its ids as missing"
                    );
                }
            }
        }

        // Group missing chunks per source so repair reuses pinned metadata.
        let mut missing_by_source: BTreeMap<usize, Vec<Chunk>> = BTreeMap::new();
        for (id, source_index, chunk) in expected {
            if !found.contains(&id) {
                report.missing += 1;
                missing_by_source.entry(source_index).or_default().push(chunk);
            }
        }
        if report.missing == 0 {
            tracing::info!(expected = report.expected, "All expected points verified");
            return Ok(report);
        }

        tracing::warn!(
            expected = report.expected,
            missing = report.missing,
            "Missing points detected; re-indexing"
        );
        for (source_index, chunks) in missing_by_source {
            let source = &sources[source_index];
            let counts = self.indexer.index_chunks(&chunks, &source.metadata).await;
            report.reindexed += counts.imported;
            tracing::info!(
                source = %source.label(),
                book = %source.metadata.book_name,
                reindexed = counts.imported,
                failed = counts.failed,
                "Repair pass for source"
            );
        }

        report.still_missing = report.missing.saturating_sub(report.reindexed);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{ChunkMetadata, chunks_path};
    use crate::embedding::{EmbeddingClient, EmbeddingError};
    use crate::metadata::BookMetadata;
    use crate::qdrant::QdrantClient;
    use async_trait::async_trait;
    use httpmock::{Method::POST, Method::PUT, MockServer};
    use std::sync::Arc;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    fn metadata() -> BookMetadata {
        BookMetadata {
            book_name: "Book".to_string(),
            author: "Unknown".to_string(),
            publish_year: "Unknown".to_string(),
            keywords: Vec::new(),
            language: "Unknown".to_string(),
            doc_id: "abc".to_string(),
        }
    }

    fn write_chunk_artifact(dir: &std::path::Path, stem: &str, texts: &[&str]) -> ProcessedSource {
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                content: text.to_string(),
                metadata: ChunkMetadata {
                    source: format!("{stem}.pdf"),
                    page_number: 1,
                    chunk_index: index,
                },
            })
            .collect();
        let path = chunks_path(dir, stem);
        std::fs::write(&path, serde_json::to_string(&chunks).expect("json")).expect("write");
        ProcessedSource {
            chunks_path: path,
            metadata: metadata(),
        }
    }

    fn indexer(base_url: String) -> Indexer {
        let qdrant = Arc::new(QdrantClient::new(&base_url, None).expect("client"));
        Indexer::new(qdrant, Arc::new(FixedEmbedder), "books".to_string(), 100, 100, 1)
    }

    #[tokio::test]
    async fn fully_present_run_is_consistent_without_repair() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_chunk_artifact(dir.path(), "book", &["alpha", "beta"]);
        let ids: Vec<String> = ["alpha", "beta"]
            .iter()
            .enumerate()
            .map(|(index, text)| {
                expected_point_id(
                    &Chunk {
                        content: text.to_string(),
                        metadata: ChunkMetadata {
                            source: "book.pdf".to_string(),
                            page_number: 1,
                            chunk_index: index,
                        },
                    },
                    &metadata(),
                )
            })
            .collect();

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/books/points");
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": [ { "id": ids[0] }, { "id": ids[1] } ]
                }));
            })
            .await;

        let indexer = indexer(server.base_url());
        let report = Reconciler::new(&indexer)
            .verify_and_repair(&[source])
            .await
            .expect("report");
        assert_eq!(report.expected, 2);
        assert_eq!(report.missing, 0);
        assert!(report.is_consistent());
    }

    #[tokio::test]
    async fn missing_points_are_reindexed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_chunk_artifact(dir.path(), "book", &["alpha", "beta"]);
        let present_id = expected_point_id(
            &Chunk {
                content: "alpha".to_string(),
                metadata: ChunkMetadata {
                    source: "book.pdf".to_string(),
                    page_number: 1,
                    chunk_index: 0,
                },
            },
            &metadata(),
        );

        let server = MockServer::start_async().await;
        server
            .mock_async(move |when, then| {
                when.method(POST).path("/collections/books/points");
                then.status(200).json_body(serde_json::json!({
                    "status": "ok",
                    "time": 0.0,
                    "result": [ { "id": present_id } ]
                }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/books/points");
                then.status(200)
                    .json_body(serde_json::json!({ "status": "ok", "time": 0.0, "result": {} }));
            })
            .await;

        let indexer = indexer(server.base_url());
        let report = Reconciler::new(&indexer)
            .verify_and_repair(&[source])
            .await
            .expect("report");
        assert_eq!(report.expected, 2);
        assert_eq!(report.missing, 1);
        assert_eq!(report.reindexed, 1);
        assert!(report.is_consistent());
        upsert.assert();
    }

    #[tokio::test]
    async fn failed_retrieve_batch_counts_all_ids_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = write_chunk_artifact(dir.path(), "book", &["alpha", "beta", "gamma"]);

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/books/points");
                then.status(500).body("retrieve down");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/books/points");
                then.status(500).body("write down");
            })
            .await;

        let indexer = indexer(server.base_url());
        let report = Reconciler::with_batch_size(&indexer, 2)
            .verify_and_repair(&[source])
            .await
            .expect("report");
        assert_eq!(report.expected, 3);
        assert_eq!(report.missing, 3);
        assert_eq!(report.reindexed, 0);
        assert_eq!(report.still_missing, 3);
        assert!(!report.is_consistent());
    }
}
