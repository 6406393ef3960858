//! Append-only audit trail of phase transitions.
//!
//! Each pipeline phase records `PHASE | STATUS | details` lines so that a run
//! can be audited after the fact. The sink is injected into the orchestrator
//! rather than reached through a global, and the core never reads the log
//! back.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Lifecycle states recorded for each phase of a document run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStatus {
    /// Phase began executing.
    Started,
    /// Phase finished successfully.
    Completed,
    /// Phase was skipped by request or because inputs were unavailable.
    Skipped,
    /// Phase failed; downstream phases will not run for this document.
    Failed,
}

impl PhaseStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
        }
    }
}

/// Sink receiving phase transition records.
pub trait StatusSink: Send + Sync {
    /// Record a single phase transition.
    fn record(&self, phase: &str, status: PhaseStatus, details: &str);
}

/// Status sink appending timestamped lines to a log file.
pub struct FileStatusLog {
    path: PathBuf,
}

impl FileStatusLog {
    /// Create a status log writing to `pipeline_status.log` under `log_dir`.
    pub fn new(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Ok(Self {
            path: log_dir.join("pipeline_status.log"),
        })
    }
}

impl StatusSink for FileStatusLog {
    fn record(&self, phase: &str, status: PhaseStatus, details: &str) {
        let timestamp = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
        let line = if details.is_empty() {
            format!("{timestamp} - PHASE: {phase} | STATUS: {}\n", status.as_str())
        } else {
            format!(
                "{timestamp} - PHASE: {phase} | STATUS: {} | {details}\n",
                status.as_str()
            )
        };

        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()) {
                    tracing::warn!(error = %err, "Failed to append status line");
                }
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Failed to open status log");
            }
        }

        match status {
            PhaseStatus::Failed => tracing::error!(phase, details, "Phase failed"),
            PhaseStatus::Skipped => tracing::info!(phase, details, "Phase skipped"),
            _ => tracing::info!(phase, status = status.as_str(), details, "Phase transition"),
        }
    }
}

/// Sink that discards every record; useful for tests and library embedding.
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn record(&self, _phase: &str, _status: PhaseStatus, _details: &str) {}
}
