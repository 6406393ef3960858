//! Command-line entry point for the bookdex ingestion pipeline.

use anyhow::bail;
use async_trait::async_trait;
use bookdex::chunks::PageText;
use bookdex::config::{get_config, init_config};
use bookdex::embedding::RestEmbeddingClient;
use bookdex::extract::{DocInfoMetadataExtractor, ExtractError, OcrEngine, RestOcrClient};
use bookdex::logging::init_tracing;
use bookdex::pipeline::{Indexer, Orchestrator, OrchestratorSettings, PhaseFlags, PipelineDirs};
use bookdex::qdrant::QdrantClient;
use bookdex::ratelimit::RateLimiter;
use bookdex::resolve::{DriveFolderLister, FolderLister, resolve_inputs};
use bookdex::status::FileStatusLog;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;

/// Embedding batches in flight at once; the per-minute limiter still gates
/// each request.
const EMBED_CONCURRENCY: usize = 3;

/// Ingest PDF books into a Qdrant collection.
#[derive(Parser)]
#[command(name = "bookdex", version, about)]
struct Args {
    /// PDF file, directory of PDFs, or URL to ingest.
    input: String,

    /// Run a single phase: 1 splits, 2 extracts, 3 embeds. Defaults to all.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
    phase: Option<u8>,

    /// Replace points of already-indexed documents instead of skipping them.
    #[arg(long)]
    overwrite: bool,

    /// Remove the document's working artifacts after a successful run.
    #[arg(long)]
    clean: bool,
}

/// Placeholder engine for runs that never reach the extract phase.
struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    async fn extract_pages(
        &self,
        _part: &Path,
        _start_page: u32,
    ) -> Result<Vec<PageText>, ExtractError> {
        Err(ExtractError::NotConfigured("OCR_API_URL"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_config();
    let config = get_config();
    init_tracing(&config.logs_dir());
    config.ensure_dirs()?;

    let flags = match args.phase {
        Some(phase) => match PhaseFlags::single(phase, args.overwrite, args.clean) {
            Some(flags) => flags,
            None => bail!("phase must be 1, 2, or 3"),
        },
        None => PhaseFlags::full(args.overwrite, args.clean),
    };
    if flags.extract && config.ocr_api_url.is_none() {
        bail!("OCR_API_URL must be set to run the extract phase");
    }

    // Each quota-limited service gets its own window.
    let embed_limiter = Arc::new(RateLimiter::new(config.max_requests_per_minute));
    let ocr_limiter = Arc::new(RateLimiter::new(config.max_requests_per_minute));
    let qdrant = Arc::new(QdrantClient::new(
        &config.qdrant_url,
        config.qdrant_api_key.clone(),
    )?);
    let embedder = Arc::new(RestEmbeddingClient::new(
        config.embedding_api_url.clone(),
        config.embedding_api_key.clone(),
        config.embedding_model.clone(),
        config.dense_vector_size,
        embed_limiter,
    )?);
    let indexer = Indexer::new(
        qdrant,
        embedder,
        config.qdrant_collection_name.clone(),
        config.embed_batch_size,
        config.qdrant_batch_size,
        EMBED_CONCURRENCY,
    );
    let ocr: Arc<dyn OcrEngine> = match &config.ocr_api_url {
        Some(url) => Arc::new(RestOcrClient::new(
            url.clone(),
            config.ocr_api_key.clone(),
            ocr_limiter,
        )?),
        None => Arc::new(DisabledOcr),
    };
    let status = Arc::new(FileStatusLog::new(&config.logs_dir())?);

    let orchestrator = Orchestrator::new(
        PipelineDirs {
            raw: config.raw_dir(),
            splitted: config.splitted_dir(),
            parsed: config.parsed_dir(),
        },
        OrchestratorSettings {
            max_split_bytes: config.max_split_bytes,
            max_split_pages: config.max_split_pages as u32,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            dense_vector_size: config.dense_vector_size,
        },
        indexer,
        ocr,
        Some(Arc::new(DocInfoMetadataExtractor)),
        status,
    );

    let drive_lister = match &config.drive_api_key {
        Some(key) => Some(DriveFolderLister::new(key.clone())?),
        None => None,
    };
    let sources = resolve_inputs(
        &args.input,
        &config.raw_dir(),
        drive_lister.as_ref().map(|lister| lister as &dyn FolderLister),
    )
    .await?;
    tracing::info!(documents = sources.len(), "Resolved input documents");

    let failures = orchestrator.run_batch(&sources, &flags).await;
    if failures > 0 {
        bail!("{failures} of {} documents failed", sources.len());
    }
    tracing::info!(documents = sources.len(), "All documents processed");
    Ok(())
}
