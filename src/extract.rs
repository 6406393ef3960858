//! External collaborator seams: OCR and metadata extraction.
//!
//! Both services are consumed through injected traits so the pipeline can be
//! exercised against test doubles, and so no third-party symbol ever needs
//! patching at runtime. The core only needs ordered `(page, text)` pairs from
//! OCR and an opaque JSON record from the metadata extractor.

use crate::chunks::PageText;
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the extraction collaborators.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The part file could not be read from disk.
    #[error("Failed to read part file: {0}")]
    Io(#[from] std::io::Error),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The service responded with an unexpected status code.
    #[error("Unexpected extraction response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// No service endpoint was configured for the requested operation.
    #[error("No endpoint configured for {0}")]
    NotConfigured(&'static str),
}

/// OCR collaborator: turns a part file into ordered per-page markdown.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Extract page text from `part`, numbering pages absolutely starting at
    /// `start_page` (the part's position within the source document).
    async fn extract_pages(
        &self,
        part: &Path,
        start_page: u32,
    ) -> Result<Vec<PageText>, ExtractError>;
}

/// Metadata collaborator: produces a raw metadata JSON record for a source.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Extract descriptive metadata for the document at `source`.
    async fn extract(&self, source: &Path) -> Result<Value, ExtractError>;
}

/// OCR client posting part files to a hosted document-understanding API.
pub struct RestOcrClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl RestOcrClient {
    /// Construct a client for the given endpoint and quota limiter.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ExtractError> {
        let client = Client::builder()
            .user_agent("bookdex/0.3")
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            limiter,
        })
    }
}

/// Metadata extractor reading the PDF's document information dictionary.
///
/// Emits only the keys the document actually carries; resolution to typed
/// fields (including fallbacks) happens downstream at the parse boundary.
pub struct DocInfoMetadataExtractor;

#[async_trait]
impl MetadataExtractor for DocInfoMetadataExtractor {
    async fn extract(&self, source: &Path) -> Result<Value, ExtractError> {
        let path = source.to_path_buf();
        let record = tokio::task::spawn_blocking(move || read_doc_info(&path))
            .await
            .map_err(std::io::Error::other)?;
        Ok(record)
    }
}

fn read_doc_info(path: &Path) -> Value {
    let mut record = serde_json::Map::new();
    let document = match lopdf::Document::load(path) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Could not read document info");
            return Value::Object(record);
        }
    };

    let info = document
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|object| match object {
            lopdf::Object::Reference(id) => document.get_object(*id).ok(),
            other => Some(other),
        })
        .and_then(|object| object.as_dict().ok());
    let Some(info) = info else {
        return Value::Object(record);
    };

    for (pdf_key, field) in [
        (b"Title".as_slice(), "book_name"),
        (b"Author".as_slice(), "author"),
        (b"Keywords".as_slice(), "keywords"),
    ] {
        if let Ok(lopdf::Object::String(bytes, _)) = info.get(pdf_key) {
            let text = decode_pdf_string(bytes);
            if !text.trim().is_empty() {
                record.insert(field.to_string(), Value::String(text.trim().to_string()));
            }
        }
    }

    // CreationDate is "D:YYYYMMDD..."; only the year is kept.
    if let Ok(lopdf::Object::String(bytes, _)) = info.get(b"CreationDate") {
        let text = decode_pdf_string(bytes);
        let digits: String = text
            .trim_start_matches("D:")
            .chars()
            .take(4)
            .filter(|c| c.is_ascii_digit())
            .collect();
        if digits.len() == 4 {
            record.insert("publish_year".to_string(), Value::String(digits));
        }
    }

    Value::Object(record)
}

/// PDF text strings are UTF-16BE when they carry a BOM, PDFDocEncoding
/// (treated as Latin-1 here) otherwise.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Deserialize)]
struct OcrPage {
    markdown: String,
}

#[async_trait]
impl OcrEngine for RestOcrClient {
    async fn extract_pages(
        &self,
        part: &Path,
        start_page: u32,
    ) -> Result<Vec<PageText>, ExtractError> {
        let bytes = tokio::fs::read(part).await?;
        let file_name = part
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("part.pdf")
            .to_string();

        self.limiter.acquire().await;
        tracing::info!(part = %file_name, bytes = bytes.len(), "Requesting OCR");

        let mut request = self.client.post(&self.endpoint).body(bytes);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .header("x-file-name", &file_name)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = ExtractError::UnexpectedStatus { status, body };
            tracing::error!(part = %file_name, error = %error, "OCR request failed");
            return Err(error);
        }

        let parsed: OcrResponse = response.json().await?;
        let pages = parsed
            .pages
            .into_iter()
            .enumerate()
            .map(|(index, page)| PageText {
                page_number: start_page + index as u32,
                content: page.markdown,
            })
            .collect();
        Ok(pages)
    }
}
