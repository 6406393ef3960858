//! Partitioning of oversized PDFs into contiguous, page-bounded parts.
//!
//! Ranges are computed from a byte budget and a page budget; each range is
//! then copied into its own part file named `base(start-end).pdf` so that
//! downstream phases can recover the absolute start page from the filename
//! alone. A range covering the whole document keeps the original name.

use lopdf::Document;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while inspecting or splitting a PDF.
#[derive(Debug, Error)]
pub enum SplitError {
    /// The source file could not be read from disk.
    #[error("Failed to read PDF: {0}")]
    Io(#[from] std::io::Error),
    /// The PDF structure could not be parsed or written.
    #[error("PDF processing failed: {0}")]
    Pdf(#[from] lopdf::Error),
    /// The source document contains no pages.
    #[error("Document has no pages: {0}")]
    EmptyDocument(PathBuf),
}

/// One contiguous page range, 1-based and inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    /// First page of the range.
    pub start: u32,
    /// Last page of the range.
    pub end: u32,
}

impl PageRange {
    /// Number of pages covered by the range.
    pub fn page_count(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Whether the range contains the given 1-based page number.
    pub fn contains(&self, page: u32) -> bool {
        page >= self.start && page <= self.end
    }
}

/// One part file produced by a split, together with the range it covers.
#[derive(Debug, Clone)]
pub struct DocumentPart {
    /// Path of the written part file.
    pub path: PathBuf,
    /// Page range of the source document covered by this part.
    pub range: PageRange,
}

/// Result of splitting one source document.
#[derive(Debug, Default)]
pub struct SplitOutcome {
    /// Parts written successfully, in range order.
    pub parts: Vec<DocumentPart>,
    /// Ranges for which both copy strategies failed.
    pub failed: Vec<PageRange>,
}

/// Page count and byte size of a PDF on disk.
pub fn pdf_info(path: &Path) -> Result<(u32, u64), SplitError> {
    let doc = Document::load(path)?;
    let pages = doc.get_pages().len() as u32;
    let bytes = fs::metadata(path)?.len();
    Ok((pages, bytes))
}

/// Compute page ranges honoring a byte budget and a page budget.
///
/// Returns a single full-document range when the source fits both budgets.
/// Otherwise the range width is derived from the average bytes per page and
/// clamped into `[1, max_pages]`; the final range may be shorter. The output
/// ranges are contiguous, non-overlapping, and cover every page exactly once.
pub fn compute_ranges(
    total_pages: u32,
    total_bytes: u64,
    max_bytes: u64,
    max_pages: u32,
) -> Vec<PageRange> {
    if total_pages == 0 {
        return Vec::new();
    }
    if total_bytes <= max_bytes && total_pages <= max_pages {
        return vec![PageRange {
            start: 1,
            end: total_pages,
        }];
    }

    let avg_bytes_per_page = total_bytes / u64::from(total_pages);
    let pages_per_chunk = if avg_bytes_per_page > 0 {
        (max_bytes / avg_bytes_per_page) as u32
    } else {
        max_pages
    }
    .clamp(1, max_pages.max(1));

    let mut ranges = Vec::new();
    let mut start = 1;
    while start <= total_pages {
        let end = (start + pages_per_chunk - 1).min(total_pages);
        ranges.push(PageRange { start, end });
        start = end + 1;
    }
    ranges
}

/// Build the file name for a part covering `range` of a `total_pages` document.
pub fn part_file_name(base: &str, range: &PageRange, total_pages: u32) -> String {
    if range.start == 1 && range.end == total_pages {
        format!("{base}.pdf")
    } else if range.start == range.end {
        format!("{base}({}).pdf", range.start)
    } else {
        format!("{base}({}-{}).pdf", range.start, range.end)
    }
}

/// Strip a trailing `(start-end)` or `(page)` suffix from a part stem,
/// recovering the normalized base name shared by all parts of one source.
pub fn strip_range_suffix(stem: &str) -> &str {
    let trimmed = stem.trim_end();
    let Some(rest) = trimmed.strip_suffix(')') else {
        return trimmed;
    };
    let Some(open) = rest.rfind('(') else {
        return trimmed;
    };
    let inner = &rest[open + 1..];
    let mut pieces = inner.splitn(2, '-');
    let first_ok = pieces
        .next()
        .is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
    let second_ok = match pieces.next() {
        Some(p) => !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()),
        None => true,
    };
    if first_ok && second_ok {
        rest[..open].trim_end()
    } else {
        trimmed
    }
}

/// Recover the absolute start page encoded in a part stem.
///
/// Parts without a range suffix start at page 1.
pub fn part_start_page(stem: &str) -> u32 {
    let trimmed = stem.trim_end();
    let Some(rest) = trimmed.strip_suffix(')') else {
        return 1;
    };
    let Some(open) = rest.rfind('(') else {
        return 1;
    };
    let inner = &rest[open + 1..];
    inner
        .split('-')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1)
}

/// Locate part files for `base` already present in `dir`, sorted by start page.
pub fn find_existing_parts(dir: &Path, base: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pdf") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if strip_range_suffix(stem) == base {
            parts.push(path);
        }
    }
    parts.sort_by_key(|path| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(part_start_page)
            .unwrap_or(1)
    });
    Ok(parts)
}

/// Split `source` into one part file per range under `out_dir`.
///
/// A failing range is retried with a page-at-a-time fallback before it is
/// counted as failed; one failed range never aborts the remaining ranges.
pub fn split_document(
    source: &Path,
    ranges: &[PageRange],
    out_dir: &Path,
) -> Result<SplitOutcome, SplitError> {
    let (total_pages, _) = pdf_info(source)?;
    if total_pages == 0 {
        return Err(SplitError::EmptyDocument(source.to_path_buf()));
    }
    fs::create_dir_all(out_dir)?;

    let base = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .trim()
        .to_string();

    let mut outcome = SplitOutcome::default();
    for range in ranges {
        let file_name = part_file_name(&base, range, total_pages);
        let target = out_dir.join(&file_name);

        match copy_range(source, &target, range, total_pages) {
            Ok(()) => {
                tracing::info!(part = %file_name, "Created part");
                outcome.parts.push(DocumentPart {
                    path: target,
                    range: *range,
                });
            }
            Err(err) => {
                tracing::warn!(part = %file_name, error = %err, "Primary copy failed; trying page-wise fallback");
                match copy_range_pagewise(source, &target, range, total_pages) {
                    Ok(()) => {
                        tracing::info!(part = %file_name, "Page-wise fallback succeeded");
                        outcome.parts.push(DocumentPart {
                            path: target,
                            range: *range,
                        });
                    }
                    Err(fallback_err) => {
                        tracing::error!(part = %file_name, error = %fallback_err, "Both copy strategies failed");
                        outcome.failed.push(*range);
                    }
                }
            }
        }
    }

    if !outcome.failed.is_empty() {
        tracing::warn!(failed = outcome.failed.len(), "Some ranges failed to split");
    }
    Ok(outcome)
}

/// Copy a page range by deleting the complement in a single pass.
fn copy_range(
    source: &Path,
    target: &Path,
    range: &PageRange,
    total_pages: u32,
) -> Result<(), SplitError> {
    let mut doc = Document::load(source)?;
    let discard: Vec<u32> = (1..=total_pages).filter(|p| !range.contains(*p)).collect();
    if !discard.is_empty() {
        doc.delete_pages(&discard);
    }
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    doc.save(target)?;
    Ok(())
}

/// Fallback copy path deleting complement pages one call at a time, which
/// tolerates page-tree entries that break batch deletion.
fn copy_range_pagewise(
    source: &Path,
    target: &Path,
    range: &PageRange,
    total_pages: u32,
) -> Result<(), SplitError> {
    let mut doc = Document::load(source)?;
    // Delete from the back so earlier page numbers stay valid.
    for page in (1..=total_pages).rev() {
        if !range.contains(page) {
            doc.delete_pages(&[page]);
        }
    }
    doc.prune_objects();
    doc.renumber_objects();
    doc.compress();
    doc.save(target)?;
    Ok(())
}
