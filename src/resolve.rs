//! Input resolution: local files, directories, and remote URLs.
//!
//! The CLI accepts one input argument and this module turns it into the list
//! of local PDF paths the pipeline consumes. Remote inputs are downloaded
//! into the raw directory first so every later phase works against local
//! files only.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised while resolving an input argument.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The input path or URL matched no PDF documents.
    #[error("No PDF documents found at {0}")]
    NoDocuments(String),
    /// Downloading a remote document failed.
    #[error("Download failed for {url}: {reason}")]
    Download {
        /// URL that failed to download.
        url: String,
        /// Failure description.
        reason: String,
    },
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One downloadable document in a remote folder.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// File name to store the download under.
    pub name: String,
    /// Direct download URL.
    pub url: String,
}

/// Enumerates the documents of a remote folder URL.
#[async_trait]
pub trait FolderLister: Send + Sync {
    /// Whether this lister recognizes `url` as a folder it can enumerate.
    fn matches(&self, url: &str) -> bool;

    /// List the downloadable documents behind a folder URL.
    async fn list(&self, url: &str) -> Result<Vec<RemoteFile>, ResolveError>;
}

/// Folder lister for shared Google Drive folders, using the Drive v3 API.
pub struct DriveFolderLister {
    client: Client,
    api_key: String,
    api_base: String,
}

impl DriveFolderLister {
    /// Construct a lister authenticating with the given API key.
    pub fn new(api_key: String) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .user_agent("bookdex/0.3")
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            api_key,
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
        })
    }
}

#[derive(serde::Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(serde::Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

#[async_trait]
impl FolderLister for DriveFolderLister {
    fn matches(&self, url: &str) -> bool {
        url.contains("drive.google.com") && url.contains("/folders/")
    }

    async fn list(&self, url: &str) -> Result<Vec<RemoteFile>, ResolveError> {
        let Some(folder_id) = drive_path_segment(url, "/folders/") else {
            return Err(ResolveError::NoDocuments(url.to_string()));
        };

        let response = self
            .client
            .get(format!("{}/files", self.api_base))
            .query(&[
                (
                    "q",
                    format!("'{folder_id}' in parents and mimeType='application/pdf'"),
                ),
                ("fields", "files(id,name)".to_string()),
                ("pageSize", "1000".to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ResolveError::Download {
                url: url.to_string(),
                reason: format!("folder listing returned {}", response.status()),
            });
        }

        let listing: DriveFileList = response.json().await?;
        Ok(listing
            .files
            .into_iter()
            .map(|file| RemoteFile {
                name: file.name,
                url: format!(
                    "{}/files/{}?alt=media&key={}",
                    self.api_base, file.id, self.api_key
                ),
            })
            .collect())
    }
}

/// Resolve an input argument into local PDF paths, downloading remote
/// documents into `raw_dir`.
pub async fn resolve_inputs(
    input: &str,
    raw_dir: &Path,
    lister: Option<&dyn FolderLister>,
) -> Result<Vec<PathBuf>, ResolveError> {
    if input.starts_with("http://") || input.starts_with("https://") {
        return resolve_remote(input, raw_dir, lister).await;
    }

    let path = Path::new(input);
    if path.is_file() {
        if !is_pdf(path) {
            return Err(ResolveError::NoDocuments(input.to_string()));
        }
        return Ok(vec![path.to_path_buf()]);
    }
    if path.is_dir() {
        let mut documents: Vec<PathBuf> = WalkDir::new(path)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_pdf(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        documents.sort();
        if documents.is_empty() {
            return Err(ResolveError::NoDocuments(input.to_string()));
        }
        return Ok(documents);
    }
    Err(ResolveError::NoDocuments(input.to_string()))
}

async fn resolve_remote(
    url: &str,
    raw_dir: &Path,
    lister: Option<&dyn FolderLister>,
) -> Result<Vec<PathBuf>, ResolveError> {
    let client = Client::builder()
        .user_agent("bookdex/0.3")
        .timeout(Duration::from_secs(600))
        .build()?;

    if let Some(lister) = lister
        && lister.matches(url)
    {
        let files = lister.list(url).await?;
        if files.is_empty() {
            return Err(ResolveError::NoDocuments(url.to_string()));
        }
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            paths.push(download(&client, &file.url, &file.name, raw_dir).await?);
        }
        return Ok(paths);
    }

    let name = file_name_from_url(url);
    let url = normalize_download_url(url);
    Ok(vec![download(&client, &url, &name, raw_dir).await?])
}

/// Drive file-share links render an HTML viewer; rewrite them to the direct
/// download endpoint. Other URLs pass through unchanged.
fn normalize_download_url(url: &str) -> String {
    if url.contains("drive.google.com")
        && let Some(file_id) = drive_path_segment(url, "/file/d/")
    {
        return format!("https://drive.google.com/uc?export=download&id={file_id}");
    }
    url.to_string()
}

fn drive_path_segment<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let rest = &url[url.find(marker)? + marker.len()..];
    let segment = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .trim();
    if segment.is_empty() { None } else { Some(segment) }
}

async fn download(
    client: &Client,
    url: &str,
    name: &str,
    raw_dir: &Path,
) -> Result<PathBuf, ResolveError> {
    tracing::info!(url, name, "Downloading document");
    let response = client.get(url).send().await?;
    if !response.status().is_success() {
        return Err(ResolveError::Download {
            url: url.to_string(),
            reason: format!("status {}", response.status()),
        });
    }
    let bytes = response.bytes().await?;

    std::fs::create_dir_all(raw_dir)?;
    let target = raw_dir.join(name);
    std::fs::write(&target, &bytes)?;
    tracing::info!(path = %target.display(), bytes = bytes.len(), "Download complete");
    Ok(target)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn file_name_from_url(url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    let candidate = trimmed.rsplit('/').next().unwrap_or("").trim();
    if candidate.is_empty() {
        return "download.pdf".to_string();
    }
    if candidate.to_ascii_lowercase().ends_with(".pdf") {
        candidate.to_string()
    } else {
        format!("{candidate}.pdf")
    }
}
