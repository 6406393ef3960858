//! Document ingestion pipeline: split, extract, embed, reconcile.
//!
//! The orchestrator drives each source document through the three phases in
//! order, halting downstream phases when an upstream one fails while letting
//! the rest of the batch continue. The indexer owns the embed-and-upsert
//! path, and the reconciler re-derives every expected point id after an
//! indexing run to verify and repair the collection.

pub mod indexer;
pub mod orchestrator;
pub mod points;
pub mod reconcile;
pub mod types;

pub use indexer::{IndexCounts, Indexer};
pub use orchestrator::{Orchestrator, OrchestratorSettings, PhaseFlags, PipelineDirs};
pub use points::{build_point, expected_point_id};
pub use reconcile::{ReconcileReport, Reconciler};
pub use types::{PipelineError, ProcessedSource};
