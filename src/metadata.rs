//! Book metadata resolution and artifact IO.
//!
//! Metadata records are produced once per source document and stored as JSON
//! keyed by the normalized base name, so every split part of the same book
//! resolves to the same record. External JSON arrives with several legacy key
//! spellings; they are resolved into a typed struct exactly once, at the
//! parse boundary, and internal code never branches on spelling again.

use crate::split::strip_range_suffix;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

const UNKNOWN: &str = "Unknown";

/// Descriptive metadata for one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookMetadata {
    /// Canonical book title used in payloads and point identity.
    pub book_name: String,
    /// Author(s), or `"Unknown"`.
    pub author: String,
    /// Publication year, or `"Unknown"`.
    pub publish_year: String,
    /// Topic keywords; empty when absent.
    pub keywords: Vec<String>,
    /// Document language, or `"Unknown"`.
    pub language: String,
    /// Content hash identity of the source document, or `"Unknown"`.
    pub doc_id: String,
}

impl BookMetadata {
    /// Resolve a raw metadata JSON object into typed fields, trying ordered
    /// legacy key candidates once per field and defaulting the title to the
    /// normalized base name.
    pub fn resolve(raw: &Value, base_name: &str) -> Self {
        Self {
            book_name: string_field(raw, &["book_name", "BOOK_NAME", "Title", "TITLE"])
                .unwrap_or_else(|| base_name.to_string()),
            author: string_field(raw, &["author", "AUTHOR"])
                .unwrap_or_else(|| UNKNOWN.to_string()),
            publish_year: string_field(raw, &["publish_year", "PUBLISH YEAR", "year"])
                .unwrap_or_else(|| UNKNOWN.to_string()),
            keywords: keywords_field(raw, &["keywords", "KEYWORDS"]),
            language: string_field(raw, &["language", "LANGUAGE"])
                .unwrap_or_else(|| UNKNOWN.to_string()),
            doc_id: string_field(raw, &["doc_id", "pdf_id"])
                .unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }

    /// Fallback record for a document with no metadata artifact on disk.
    pub fn unknown(base_name: &str, doc_id: Option<&str>) -> Self {
        Self {
            book_name: base_name.to_string(),
            author: UNKNOWN.to_string(),
            publish_year: UNKNOWN.to_string(),
            keywords: Vec::new(),
            language: UNKNOWN.to_string(),
            doc_id: doc_id.unwrap_or(UNKNOWN).to_string(),
        }
    }
}

fn string_field(raw: &Value, candidates: &[&str]) -> Option<String> {
    for key in candidates {
        match raw.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn keywords_field(raw: &Value, candidates: &[&str]) -> Vec<String> {
    for key in candidates {
        match raw.get(key) {
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .map(str::to_string)
                    .collect();
            }
            Some(Value::String(s)) if !s.trim().is_empty() => {
                return s.split(',').map(|k| k.trim().to_string()).collect();
            }
            _ => {}
        }
    }
    Vec::new()
}

/// Path of the metadata artifact for a normalized base name.
pub fn metadata_path(raw_dir: &Path, base_name: &str) -> PathBuf {
    raw_dir.join(format!("{base_name}_metadata.json"))
}

/// Load the metadata record backing a part, resolving legacy keys.
///
/// The part's page-range suffix is stripped so every part of the same source
/// reads the same artifact; a missing or unreadable artifact falls back to
/// per-field `"Unknown"` values.
pub fn load_for_part(raw_dir: &Path, part_stem: &str) -> BookMetadata {
    let base_name = strip_range_suffix(part_stem);
    let path = metadata_path(raw_dir, base_name);

    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<Value>(&contents) {
            Ok(raw) => BookMetadata::resolve(&raw, base_name),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Metadata artifact is not valid JSON");
                BookMetadata::unknown(base_name, None)
            }
        },
        Err(_) => BookMetadata::unknown(base_name, None),
    }
}

/// Persist a raw metadata JSON value, injecting the document's `doc_id`.
pub fn save_metadata(raw_dir: &Path, base_name: &str, mut raw: Value, doc_id: &str) -> std::io::Result<()> {
    if let Some(map) = raw.as_object_mut() {
        map.insert("doc_id".into(), Value::String(doc_id.to_string()));
    }
    let path = metadata_path(raw_dir, base_name);
    std::fs::create_dir_all(raw_dir)?;
    std::fs::write(&path, serde_json::to_string_pretty(&raw)?)?;
    tracing::info!(path = %path.display(), "Metadata saved");
    Ok(())
}
