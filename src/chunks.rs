//! Chunk model, chunk artifact IO, and page-to-chunk splitting.
//!
//! The embed phase consumes `<part-stem>_chunks.json` artifacts written here.
//! Splitting is token-budgeted: `tiktoken` counts tokens when the encoding is
//! available and a whitespace counter is the fallback, mirroring how the rest
//! of the pipeline degrades instead of aborting.

use semchunk_rs::Chunker;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::cl100k_base;

/// Errors produced while turning page text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A zero token budget cannot produce chunks.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// One page of extracted text, numbered in source-document coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    /// Absolute page number within the original source document.
    pub page_number: u32,
    /// Markdown text extracted for the page.
    pub content: String,
}

/// Positional metadata carried by every chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// File name of the part the chunk was extracted from.
    pub source: String,
    /// Absolute page number the chunk text came from.
    pub page_number: u32,
    /// Ordinal of the chunk within its part.
    pub chunk_index: usize,
}

/// A unit of extracted text, the embedding granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text content.
    pub content: String,
    /// Page and ordinal metadata.
    pub metadata: ChunkMetadata,
}

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

fn build_token_counter() -> TokenCounter {
    match cl100k_base() {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(err) => {
            tracing::warn!(error = %err, "Tokenizer unavailable; falling back to whitespace counter");
            Arc::new(|segment: &str| {
                let tokens = segment.split_whitespace().count();
                if tokens == 0 && !segment.is_empty() { 1 } else { tokens }
            })
        }
    }
}

/// Split extracted pages into token-budgeted chunks.
///
/// Chunks never span pages, so each keeps an unambiguous page number. When
/// `overlap` is non-zero, each chunk after the first within a page is
/// prefixed with the word tail of its predecessor. Whitespace-only pages
/// produce no chunks.
pub fn chunk_pages(
    pages: &[PageText],
    source: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }

    let counter = build_token_counter();
    let counter_for_chunker = counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );

    let mut chunks = Vec::new();
    for page in pages {
        if page.content.trim().is_empty() {
            continue;
        }
        let pieces = chunker.chunk(&page.content);
        let mut previous: Option<String> = None;
        for piece in pieces {
            let content = match (&previous, overlap) {
                (Some(prev), n) if n > 0 => {
                    let tail = word_tail(prev, n);
                    if tail.is_empty() {
                        piece.clone()
                    } else {
                        format!("{tail} {piece}")
                    }
                }
                _ => piece.clone(),
            };
            chunks.push(Chunk {
                content,
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    page_number: page.page_number,
                    chunk_index: chunks.len(),
                },
            });
            previous = Some(piece);
        }
    }
    Ok(chunks)
}

fn word_tail(text: &str, words: usize) -> String {
    let all: Vec<&str> = text.split_whitespace().collect();
    let start = all.len().saturating_sub(words);
    all[start..].join(" ")
}

/// Path of the chunk artifact for a part stem.
pub fn chunks_path(parsed_dir: &Path, part_stem: &str) -> PathBuf {
    parsed_dir.join(format!("{part_stem}_chunks.json"))
}

/// Write the markdown, pages, and chunk artifacts for one parsed part.
pub fn save_part_artifacts(
    parsed_dir: &Path,
    part_stem: &str,
    pages: &[PageText],
    chunks: &[Chunk],
) -> std::io::Result<()> {
    std::fs::create_dir_all(parsed_dir)?;

    let markdown: Vec<&str> = pages.iter().map(|p| p.content.as_str()).collect();
    std::fs::write(
        parsed_dir.join(format!("{part_stem}.md")),
        markdown.join("\n\n"),
    )?;
    std::fs::write(
        parsed_dir.join(format!("{part_stem}_pages.json")),
        serde_json::to_string_pretty(pages)?,
    )?;
    std::fs::write(
        chunks_path(parsed_dir, part_stem),
        serde_json::to_string_pretty(chunks)?,
    )?;
    tracing::info!(part = part_stem, chunks = chunks.len(), "Saved parsed artifacts");
    Ok(())
}

/// Load a chunk artifact from disk.
pub fn load_chunks(path: &Path) -> std::io::Result<Vec<Chunk>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
