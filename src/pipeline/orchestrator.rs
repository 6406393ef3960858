//! Per-document phase orchestration: split, extract, embed, cleanup.
//!
//! Phases run in order and share state only through filesystem artifacts, so
//! any phase can be re-run alone against the artifacts of an earlier run. A
//! failing phase halts the remaining phases for its document; the rest of
//! the batch continues.

use crate::chunks::{chunk_pages, chunks_path, load_chunks, save_part_artifacts};
use crate::extract::{MetadataExtractor, OcrEngine};
use crate::identity;
use crate::metadata::{load_for_part, save_metadata};
use crate::pipeline::indexer::{IndexCounts, Indexer};
use crate::pipeline::reconcile::Reconciler;
use crate::pipeline::types::{PipelineError, ProcessedSource};
use crate::split::{compute_ranges, find_existing_parts, part_start_page, pdf_info, split_document};
use crate::status::{PhaseStatus, StatusSink};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PHASE_SPLIT: &str = "Split";
const PHASE_EXTRACT: &str = "Extract";
const PHASE_EMBED: &str = "Embed";
const PHASE_CLEANUP: &str = "Cleanup";

/// Which phases a run executes, plus the overwrite and cleanup switches.
#[derive(Debug, Clone, Copy)]
pub struct PhaseFlags {
    /// Run the split phase.
    pub split: bool,
    /// Run the OCR-and-chunk phase.
    pub extract: bool,
    /// Run the embed-and-index phase.
    pub embed: bool,
    /// Replace points of an already-indexed document instead of skipping it.
    pub overwrite: bool,
    /// Remove the document's working artifacts after a successful run.
    pub clean: bool,
}

impl PhaseFlags {
    /// Full pipeline run.
    pub fn full(overwrite: bool, clean: bool) -> Self {
        Self {
            split: true,
            extract: true,
            embed: true,
            overwrite,
            clean,
        }
    }

    /// Single-phase run; phase 1 splits, 2 extracts, 3 embeds.
    pub fn single(phase: u8, overwrite: bool, clean: bool) -> Option<Self> {
        let (split, extract, embed) = match phase {
            1 => (true, false, false),
            2 => (false, true, false),
            3 => (false, false, true),
            _ => return None,
        };
        Some(Self {
            split,
            extract,
            embed,
            overwrite,
            clean,
        })
    }
}

/// Working directories shared by the phases.
#[derive(Debug, Clone)]
pub struct PipelineDirs {
    /// Source PDFs and metadata artifacts.
    pub raw: PathBuf,
    /// Split part files.
    pub splitted: PathBuf,
    /// Markdown, pages, and chunk artifacts.
    pub parsed: PathBuf,
}

/// Scalar knobs for the orchestrator, resolved from configuration.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Byte budget per part file.
    pub max_split_bytes: u64,
    /// Page budget per part file.
    pub max_split_pages: u32,
    /// Token budget per chunk.
    pub chunk_size: usize,
    /// Word overlap between successive chunks of a page.
    pub chunk_overlap: usize,
    /// Dense vector dimensionality for collection creation.
    pub dense_vector_size: usize,
}

/// Drives one document at a time through the configured phases.
pub struct Orchestrator {
    dirs: PipelineDirs,
    settings: OrchestratorSettings,
    indexer: Indexer,
    ocr: Arc<dyn OcrEngine>,
    metadata_extractor: Option<Arc<dyn MetadataExtractor>>,
    status: Arc<dyn StatusSink>,
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    pub fn new(
        dirs: PipelineDirs,
        settings: OrchestratorSettings,
        indexer: Indexer,
        ocr: Arc<dyn OcrEngine>,
        metadata_extractor: Option<Arc<dyn MetadataExtractor>>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            dirs,
            settings,
            indexer,
            ocr,
            metadata_extractor,
            status,
        }
    }

    /// Run every source through the configured phases sequentially.
    ///
    /// Returns the number of documents that failed; one failing document
    /// never aborts the rest of the batch.
    pub async fn run_batch(&self, sources: &[PathBuf], flags: &PhaseFlags) -> usize {
        let mut failures = 0;
        for source in sources {
            if let Err(err) = self.run_document(source, flags).await {
                failures += 1;
                tracing::error!(
                    source = %source.display(),
                    error = %err,
                    "Document run failed"
                );
            }
        }
        if failures > 0 {
            tracing::warn!(failures, total = sources.len(), "Batch finished with failures");
        }
        failures
    }

    /// Run one document through the configured phases.
    pub async fn run_document(
        &self,
        source: &Path,
        flags: &PhaseFlags,
    ) -> Result<(), PipelineError> {
        let base = base_name(source);
        tracing::info!(document = %base, "Starting document run");

        let parts = if flags.split {
            match self.run_split(source, &base, flags.overwrite).await {
                Ok(parts) => parts,
                Err(err) if err.is_conflict() => {
                    self.status.record(
                        PHASE_SPLIT,
                        PhaseStatus::Skipped,
                        &format!("File: {base}.pdf | Already indexed; use --overwrite to replace"),
                    );
                    return Ok(());
                }
                Err(err) => {
                    self.status.record(
                        PHASE_SPLIT,
                        PhaseStatus::Failed,
                        &format!("File: {base}.pdf | {err}"),
                    );
                    return Err(err);
                }
            }
        } else {
            let parts = find_existing_parts(&self.dirs.splitted, &base)?;
            if parts.is_empty() && (flags.extract || flags.embed) {
                let phase = if flags.extract { PHASE_EXTRACT } else { PHASE_EMBED };
                self.status.record(
                    phase,
                    PhaseStatus::Failed,
                    &format!("File: {base}.pdf | No existing split parts found"),
                );
                return Err(PipelineError::NotFound(self.dirs.splitted.join(&base)));
            }
            parts
        };

        if flags.extract
            && let Err(err) = self.run_extract(&base, &parts).await
        {
            self.status.record(
                PHASE_EXTRACT,
                PhaseStatus::Failed,
                &format!("File: {base}.pdf | {err}"),
            );
            return Err(err);
        }

        if flags.embed {
            match self.run_embed(&base, &parts, flags).await {
                Ok(EmbedOutcome::Done) => {}
                Ok(EmbedOutcome::Skipped) => return Ok(()),
                Err(err) => {
                    self.status.record(
                        PHASE_EMBED,
                        PhaseStatus::Failed,
                        &format!("File: {base}.pdf | {err}"),
                    );
                    return Err(err);
                }
            }
        }

        if flags.clean {
            self.run_cleanup(&base);
        }
        Ok(())
    }

    /// Copy the source into the raw directory, establish identity, gate on
    /// existing points, persist metadata, and write part files.
    async fn run_split(
        &self,
        source: &Path,
        base: &str,
        overwrite: bool,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        self.status.record(
            PHASE_SPLIT,
            PhaseStatus::Started,
            &format!("File: {base}.pdf"),
        );

        if !source.is_file() {
            return Err(PipelineError::NotFound(source.to_path_buf()));
        }
        std::fs::create_dir_all(&self.dirs.raw)?;
        let raw_path = self.dirs.raw.join(format!("{base}.pdf"));
        if source != raw_path {
            std::fs::copy(source, &raw_path)?;
        }

        let doc_id = identity::doc_id(&raw_path)?;
        tracing::info!(document = base, doc_id = %doc_id, "Computed document identity");

        self.indexer
            .ensure_ready(self.settings.dense_vector_size)
            .await?;
        self.indexer.prepare_document(&doc_id, overwrite).await?;

        // Identity is persisted even without an extractor so later phases
        // resolve the same doc_id from the artifact.
        let raw_metadata = match &self.metadata_extractor {
            Some(extractor) => match extractor.extract(&raw_path).await {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(document = base, error = %err, "Metadata extraction failed; continuing with defaults");
                    json!({})
                }
            },
            None => json!({}),
        };
        save_metadata(&self.dirs.raw, base, raw_metadata, &doc_id)?;

        let (total_pages, total_bytes) = pdf_info(&raw_path)?;
        let ranges = compute_ranges(
            total_pages,
            total_bytes,
            self.settings.max_split_bytes,
            self.settings.max_split_pages,
        );
        let outcome = split_document(&raw_path, &ranges, &self.dirs.splitted)?;
        if outcome.parts.is_empty() {
            return Err(PipelineError::NoParts(raw_path));
        }

        let details = if outcome.failed.is_empty() {
            format!("Generated {} parts", outcome.parts.len())
        } else {
            format!(
                "Generated {} parts ({} ranges failed)",
                outcome.parts.len(),
                outcome.failed.len()
            )
        };
        self.status.record(PHASE_SPLIT, PhaseStatus::Completed, &details);
        Ok(outcome.parts.into_iter().map(|part| part.path).collect())
    }

    /// OCR every part, chunk the pages, and persist parsed artifacts.
    async fn run_extract(&self, base: &str, parts: &[PathBuf]) -> Result<(), PipelineError> {
        self.status.record(
            PHASE_EXTRACT,
            PhaseStatus::Started,
            &format!("File: {base}.pdf | {} parts", parts.len()),
        );

        for part in parts {
            let stem = part_stem(part);
            let start_page = part_start_page(&stem);
            let pages = self.ocr.extract_pages(part, start_page).await?;
            let chunks = chunk_pages(
                &pages,
                &part_file_name(part),
                self.settings.chunk_size,
                self.settings.chunk_overlap,
            )?;
            save_part_artifacts(&self.dirs.parsed, &stem, &pages, &chunks)?;
        }

        self.status.record(
            PHASE_EXTRACT,
            PhaseStatus::Completed,
            &format!("Parsed {} parts", parts.len()),
        );
        Ok(())
    }

    /// Index every part's chunks, then verify and repair the collection.
    async fn run_embed(
        &self,
        base: &str,
        parts: &[PathBuf],
        flags: &PhaseFlags,
    ) -> Result<EmbedOutcome, PipelineError> {
        self.status.record(
            PHASE_EMBED,
            PhaseStatus::Started,
            &format!("File: {base}.pdf | {} parts", parts.len()),
        );

        // The document embeds whole or not at all: one missing chunk
        // artifact skips every part, with the gaps named.
        let missing: Vec<String> = parts
            .iter()
            .map(|part| part_stem(part))
            .filter(|stem| !chunks_path(&self.dirs.parsed, stem).is_file())
            .collect();
        if !missing.is_empty() {
            self.status.record(
                PHASE_EMBED,
                PhaseStatus::Skipped,
                &format!("Missing chunk artifacts: {}", missing.join(", ")),
            );
            return Ok(EmbedOutcome::Skipped);
        }

        self.indexer
            .ensure_ready(self.settings.dense_vector_size)
            .await?;
        if !flags.split {
            // The overwrite gate already ran when split executed.
            let metadata = load_for_part(&self.dirs.raw, base);
            match self.indexer.prepare_document(&metadata.doc_id, flags.overwrite).await {
                Ok(_) => {}
                Err(err) if err.is_conflict() => {
                    self.status.record(
                        PHASE_EMBED,
                        PhaseStatus::Skipped,
                        &format!("File: {base}.pdf | Already indexed; use --overwrite to replace"),
                    );
                    return Ok(EmbedOutcome::Skipped);
                }
                Err(err) => return Err(err),
            }
        }

        let size_before = self.collection_size().await;
        let mut totals = IndexCounts::default();
        let mut total_chunks = 0usize;
        let mut processed: Vec<ProcessedSource> = Vec::with_capacity(parts.len());
        for part in parts {
            let stem = part_stem(part);
            let metadata = load_for_part(&self.dirs.raw, &stem);
            let path = chunks_path(&self.dirs.parsed, &stem);
            let chunks = load_chunks(&path)?;
            total_chunks += chunks.len();
            totals.absorb(self.indexer.index_chunks(&chunks, &metadata).await);
            processed.push(ProcessedSource {
                chunks_path: path,
                metadata,
            });
        }

        let report = Reconciler::new(&self.indexer)
            .verify_and_repair(&processed)
            .await?;
        let size_after = self.collection_size().await;
        if !report.is_consistent() {
            self.status.record(
                PHASE_EMBED,
                PhaseStatus::Failed,
                &format!(
                    "Imported {}/{} chunks | {} points still missing after repair",
                    totals.imported, total_chunks, report.still_missing
                ),
            );
            return Err(PipelineError::Inconsistent {
                missing: report.still_missing,
            });
        }

        self.status.record(
            PHASE_EMBED,
            PhaseStatus::Completed,
            &format!(
                "Imported {}/{} chunks ({} repaired) | Collection: {} -> {} points",
                totals.imported + report.reindexed,
                total_chunks,
                report.reindexed,
                format_count(size_before),
                format_count(size_after),
            ),
        );
        Ok(EmbedOutcome::Done)
    }

    /// Remove the document's working files from every stage directory.
    /// Failures are logged and never fail the run.
    fn run_cleanup(&self, base: &str) {
        let mut removed = 0usize;
        for dir in [&self.dirs.raw, &self.dirs.splitted, &self.dirs.parsed] {
            removed += remove_matching(dir, base);
        }
        self.status.record(
            PHASE_CLEANUP,
            PhaseStatus::Completed,
            &format!("Removed {removed} files for {base}"),
        );
    }

    async fn collection_size(&self) -> Option<u64> {
        match self
            .indexer
            .store()
            .collection_point_count(self.indexer.collection())
            .await
        {
            Ok(count) => Some(count),
            Err(err) => {
                tracing::warn!(error = %err, "Could not read collection size");
                None
            }
        }
    }
}

enum EmbedOutcome {
    Done,
    Skipped,
}

fn base_name(source: &Path) -> String {
    source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document")
        .trim()
        .to_string()
}

fn part_stem(part: &Path) -> String {
    part.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("part")
        .to_string()
}

fn part_file_name(part: &Path) -> String {
    part.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("part.pdf")
        .to_string()
}

fn format_count(count: Option<u64>) -> String {
    match count {
        Some(value) => value.to_string(),
        None => "?".to_string(),
    }
}

fn remove_matching(dir: &Path, base: &str) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(base) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => {
                tracing::warn!(path = %entry.path().display(), error = %err, "Cleanup could not remove file");
            }
        }
    }
    removed
}
