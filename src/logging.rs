//! Tracing setup: compact stdout output plus a file mirror in the data tree.
//!
//! The file layer defaults to `bookdex.log` inside the configured logs
//! directory, next to the pipeline status log; `BOOKDEX_LOG_FILE` overrides
//! the target with an explicit path. File writes go through a non-blocking
//! appender so slow disks never stall pipeline tasks.

use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Keeps the non-blocking worker alive for the process lifetime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global tracing subscriber.
///
/// Filtering honors `RUST_LOG` (defaults to `info`). Stdout gets a compact
/// layer; a file layer is added when a log target can be opened under
/// `logs_dir` or at the `BOOKDEX_LOG_FILE` override.
pub fn init_tracing(logs_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(false).compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match file_writer(logs_dir, std::env::var("BOOKDEX_LOG_FILE").ok()) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

/// Open the log target and wrap it in a non-blocking writer.
///
/// Returns `None` when the target cannot be created; the pipeline still logs
/// to stdout in that case.
fn file_writer(logs_dir: &Path, override_path: Option<String>) -> Option<NonBlocking> {
    let (non_blocking, guard) = match override_path {
        Some(path) => {
            let file = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(file) => file,
                Err(err) => {
                    eprintln!("Failed to open log file {path}: {err}");
                    return None;
                }
            };
            tracing_appender::non_blocking(file)
        }
        None => {
            if let Err(err) = std::fs::create_dir_all(logs_dir) {
                eprintln!(
                    "Failed to create logs directory {}: {err}",
                    logs_dir.display()
                );
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                logs_dir,
                "bookdex.log",
            ))
        }
    };
    let _ = LOG_GUARD.set(guard);
    Some(non_blocking)
}
