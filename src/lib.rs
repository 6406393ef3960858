#![deny(missing_docs)]

//! Core library for the bookdex ingestion pipeline.
//!
//! The pipeline turns oversized PDF books into vector-store points: it splits
//! sources into page-bounded parts, extracts per-book metadata, chunks page
//! text, embeds chunks with dense and sparse vectors, upserts them into
//! Qdrant, and finally verifies that every expected chunk made it into the
//! collection, re-driving the ones that did not.

/// Chunk model and chunk artifact IO.
pub mod chunks;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// External collaborator seams: OCR and metadata extraction.
pub mod extract;
/// Content hashing and deterministic point identity.
pub mod identity;
/// Structured logging and tracing setup.
pub mod logging;
/// Book metadata resolution and artifacts.
pub mod metadata;
/// Ingestion pipeline: point building, indexing, reconciliation, phases.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// Sliding-window request throttling for quota-limited services.
pub mod ratelimit;
/// Input resolution for local paths, directories, and remote URLs.
pub mod resolve;
/// PDF partitioning into page-bounded parts.
pub mod split;
/// Append-only phase status log.
pub mod status;
