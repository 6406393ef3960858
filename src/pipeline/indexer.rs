//! Batched embed-and-upsert path with document-level overwrite protection.

use crate::chunks::Chunk;
use crate::embedding::sparse::Bm25SparseEncoder;
use crate::embedding::{EmbeddingClient, embed_aligned};
use crate::metadata::BookMetadata;
use crate::pipeline::points::build_point;
use crate::pipeline::types::PipelineError;
use crate::qdrant::{QdrantClient, doc_id_filter};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

/// Per-run import accounting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexCounts {
    /// Points written to the collection.
    pub imported: usize,
    /// Chunks whose batch failed after retries.
    pub failed: usize,
}

impl IndexCounts {
    /// Fold another batch's counts into this one.
    pub fn absorb(&mut self, other: IndexCounts) {
        self.imported += other.imported;
        self.failed += other.failed;
    }
}

/// Turns chunk batches into fully built points and upserts them.
///
/// A batch is the unit of failure: one failing batch marks its chunks failed
/// and the remaining batches still run. Upserts wait for the write to apply
/// so reconciliation observes a settled collection.
pub struct Indexer {
    qdrant: Arc<QdrantClient>,
    embedder: Arc<dyn EmbeddingClient>,
    sparse: Bm25SparseEncoder,
    collection: String,
    embed_batch_size: usize,
    upsert_batch_size: usize,
    embed_concurrency: usize,
}

impl Indexer {
    /// Construct an indexer over the given store and embedding backend.
    pub fn new(
        qdrant: Arc<QdrantClient>,
        embedder: Arc<dyn EmbeddingClient>,
        collection: String,
        embed_batch_size: usize,
        upsert_batch_size: usize,
        embed_concurrency: usize,
    ) -> Self {
        Self {
            qdrant,
            embedder,
            sparse: Bm25SparseEncoder::default(),
            collection,
            embed_batch_size: embed_batch_size.max(1),
            upsert_batch_size: upsert_batch_size.max(1),
            embed_concurrency: embed_concurrency.max(1),
        }
    }

    /// Collection this indexer writes into.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Store handle, shared with the reconciler.
    pub fn store(&self) -> &QdrantClient {
        &self.qdrant
    }

    /// Create the collection when absent.
    pub async fn ensure_ready(&self, dense_size: usize) -> Result<(), PipelineError> {
        self.qdrant
            .ensure_collection(&self.collection, dense_size)
            .await?;
        Ok(())
    }

    /// Gate a document against points already in the collection.
    ///
    /// When points exist under `doc_id`, either delete them (overwrite) or
    /// fail with [`PipelineError::AlreadyExists`] so the caller skips the
    /// document. Returns the number of points removed.
    pub async fn prepare_document(
        &self,
        doc_id: &str,
        overwrite: bool,
    ) -> Result<u64, PipelineError> {
        let filter = doc_id_filter(doc_id);
        let existing = self.qdrant.count(&self.collection, &filter).await?;
        if existing == 0 {
            return Ok(0);
        }
        if !overwrite {
            return Err(PipelineError::AlreadyExists {
                doc_id: doc_id.to_string(),
            });
        }

        tracing::info!(doc_id, existing, "Overwrite requested; deleting existing points");
        self.qdrant
            .delete_by_filter(&self.collection, &filter)
            .await?;
        Ok(existing)
    }

    /// Embed and upsert chunks in fixed-size batches with bounded concurrency.
    ///
    /// Empty chunks are excluded (never failed). Failures are isolated per
    /// batch and reported through the returned counts.
    pub async fn index_chunks(&self, chunks: &[Chunk], metadata: &BookMetadata) -> IndexCounts {
        if chunks.is_empty() {
            return IndexCounts::default();
        }

        let batches: Vec<(usize, &[Chunk])> = chunks
            .chunks(self.embed_batch_size)
            .enumerate()
            .collect();

        let results = stream::iter(batches)
            .map(|(index, batch)| async move {
                match self.index_batch(batch, metadata).await {
                    Ok(imported) => IndexCounts {
                        imported,
                        failed: 0,
                    },
                    Err(err) => {
                        tracing::error!(
                            batch = index,
                            chunks = batch.len(),
                            error = %err,
                            "Batch failed; continuing with remaining batches"
                        );
                        IndexCounts {
                            imported: 0,
                            failed: batch.len(),
                        }
                    }
                }
            })
            .buffer_unordered(self.embed_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut counts = IndexCounts::default();
        for result in results {
            counts.absorb(result);
        }
        tracing::info!(
            book = %metadata.book_name,
            imported = counts.imported,
            failed = counts.failed,
            total = chunks.len(),
            "Indexed chunk set"
        );
        counts
    }

    async fn index_batch(
        &self,
        batch: &[Chunk],
        metadata: &BookMetadata,
    ) -> Result<usize, PipelineError> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
        let dense = embed_aligned(self.embedder.as_ref(), &texts).await?;
        let sparse = self.sparse.encode_batch(&texts);

        let mut points = Vec::with_capacity(batch.len());
        for ((chunk, dense), sparse) in batch.iter().zip(dense).zip(sparse) {
            // Empty chunks got no dense vector and produce no point.
            if let Some(dense) = dense {
                points.push(build_point(chunk, metadata, dense, sparse));
            }
        }

        for group in points.chunks(self.upsert_batch_size) {
            self.qdrant
                .upsert_points(&self.collection, group, true)
                .await?;
        }
        Ok(points.len())
    }
}
