//! End-to-end pipeline runs against a mocked Qdrant instance.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bookdex::chunks::PageText;
use bookdex::embedding::{EmbeddingClient, EmbeddingError};
use bookdex::extract::{ExtractError, OcrEngine};
use bookdex::pipeline::{Indexer, Orchestrator, OrchestratorSettings, PhaseFlags, PipelineDirs};
use bookdex::qdrant::QdrantClient;
use bookdex::status::FileStatusLog;
use httpmock::{Method::GET, Method::POST, Method::PUT, MockServer};
use lopdf::{Document, Object, Stream, dictionary};
use serde_json::json;
use tempfile::TempDir;

struct StubOcr;

#[async_trait]
impl OcrEngine for StubOcr {
    async fn extract_pages(
        &self,
        _part: &Path,
        start_page: u32,
    ) -> Result<Vec<PageText>, ExtractError> {
        Ok(vec![
            PageText {
                page_number: start_page,
                content: "The mitral valve separates the left atrium and ventricle.".to_string(),
            },
            PageText {
                page_number: start_page + 1,
                content: "The aortic valve opens during ventricular systole.".to_string(),
            },
        ])
    }
}

struct StubEmbedder;

#[async_trait]
impl EmbeddingClient for StubEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
    }
}

struct Harness {
    _data: TempDir,
    dirs: PipelineDirs,
    logs: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let data = TempDir::new().expect("tempdir");
        let dirs = PipelineDirs {
            raw: data.path().join("raw"),
            splitted: data.path().join("splitted"),
            parsed: data.path().join("parsed"),
        };
        let logs = data.path().join("logs");
        Self {
            _data: data,
            dirs,
            logs,
        }
    }

    fn orchestrator(&self, qdrant_url: &str) -> Orchestrator {
        let qdrant = Arc::new(QdrantClient::new(qdrant_url, None).expect("client"));
        let indexer =
            Indexer::new(qdrant, Arc::new(StubEmbedder), "books".to_string(), 100, 100, 1);
        Orchestrator::new(
            self.dirs.clone(),
            OrchestratorSettings {
                max_split_bytes: 50 * 1024 * 1024,
                max_split_pages: 500,
                chunk_size: 1000,
                chunk_overlap: 0,
                dense_vector_size: 2,
            },
            indexer,
            Arc::new(StubOcr),
            None,
            Arc::new(FileStatusLog::new(&self.logs).expect("status log")),
        )
    }

    fn status_log(&self) -> String {
        std::fs::read_to_string(self.logs.join("pipeline_status.log")).unwrap_or_default()
    }
}

fn write_fixture_pdf(path: &Path, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for index in 0..pages {
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            format!("BT 72 700 Td (page {index}) Tj ET").into_bytes(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save fixture");
}

async fn mock_collection_info(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/collections/books");
            then.status(200).json_body(json!({
                "status": "ok",
                "time": 0.0,
                "result": { "points_count": 0 }
            }));
        })
        .await;
}

async fn mock_count(server: &MockServer, count: u64) {
    server
        .mock_async(move |when, then| {
            when.method(POST).path("/collections/books/points/count");
            then.status(200).json_body(
                json!({ "status": "ok", "time": 0.0, "result": { "count": count } }),
            );
        })
        .await;
}

async fn mock_retrieve_empty(server: &MockServer) {
    server
        .mock_async(|when, then| {
            when.method(POST).path("/collections/books/points");
            then.status(200)
                .json_body(json!({ "status": "ok", "time": 0.0, "result": [] }));
        })
        .await;
}

async fn mock_upsert(server: &MockServer) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(PUT).path("/collections/books/points");
            then.status(200)
                .json_body(json!({ "status": "ok", "time": 0.0, "result": {} }));
        })
        .await
}

#[tokio::test]
async fn full_run_indexes_every_chunk_and_repairs_gaps() {
    let server = MockServer::start_async().await;
    mock_collection_info(&server).await;
    mock_count(&server, 0).await;
    // Retrieve reports nothing present, so reconciliation must repair
    // everything it expected.
    mock_retrieve_empty(&server).await;
    let upsert = mock_upsert(&server).await;

    let harness = Harness::new();
    let source_dir = TempDir::new().expect("tempdir");
    let source = source_dir.path().join("cardiology.pdf");
    write_fixture_pdf(&source, 2);

    let orchestrator = harness.orchestrator(&server.base_url());
    orchestrator
        .run_document(&source, &PhaseFlags::full(false, false))
        .await
        .expect("full run");

    // Initial indexing plus the repair pass.
    assert_eq!(upsert.hits_async().await, 2);
    assert!(harness.dirs.raw.join("cardiology.pdf").is_file());
    assert!(harness.dirs.raw.join("cardiology_metadata.json").is_file());
    assert!(harness.dirs.splitted.join("cardiology.pdf").is_file());
    assert!(harness.dirs.parsed.join("cardiology_chunks.json").is_file());

    let log = harness.status_log();
    assert!(log.contains("PHASE: Split | STATUS: COMPLETED"));
    assert!(log.contains("PHASE: Extract | STATUS: COMPLETED"));
    assert!(log.contains("PHASE: Embed | STATUS: COMPLETED"));
}

#[tokio::test]
async fn already_indexed_document_is_skipped_without_overwrite() {
    let server = MockServer::start_async().await;
    mock_collection_info(&server).await;
    mock_count(&server, 5).await;
    let upsert = mock_upsert(&server).await;

    let harness = Harness::new();
    let source_dir = TempDir::new().expect("tempdir");
    let source = source_dir.path().join("cardiology.pdf");
    write_fixture_pdf(&source, 2);

    let orchestrator = harness.orchestrator(&server.base_url());
    orchestrator
        .run_document(&source, &PhaseFlags::full(false, false))
        .await
        .expect("skip is not a failure");

    assert_eq!(upsert.hits_async().await, 0);
    assert!(harness.status_log().contains("PHASE: Split | STATUS: SKIPPED"));
}

#[tokio::test]
async fn overwrite_deletes_existing_points_before_reindexing() {
    let server = MockServer::start_async().await;
    mock_collection_info(&server).await;
    mock_count(&server, 5).await;
    let delete = server
        .mock_async(|when, then| {
            when.method(POST).path("/collections/books/points/delete");
            then.status(200)
                .json_body(json!({ "status": "ok", "time": 0.0, "result": {} }));
        })
        .await;
    mock_retrieve_empty(&server).await;
    let upsert = mock_upsert(&server).await;

    let harness = Harness::new();
    let source_dir = TempDir::new().expect("tempdir");
    let source = source_dir.path().join("cardiology.pdf");
    write_fixture_pdf(&source, 2);

    let orchestrator = harness.orchestrator(&server.base_url());
    orchestrator
        .run_document(&source, &PhaseFlags::full(true, false))
        .await
        .expect("overwrite run");

    delete.assert_async().await;
    assert!(upsert.hits_async().await > 0);
}

#[tokio::test]
async fn embed_phase_skips_whole_document_when_chunk_artifacts_are_missing() {
    let server = MockServer::start_async().await;
    let harness = Harness::new();

    // A split part exists but was never extracted.
    std::fs::create_dir_all(&harness.dirs.splitted).expect("mkdir");
    write_fixture_pdf(&harness.dirs.splitted.join("atlas(1-2).pdf"), 2);

    let orchestrator = harness.orchestrator(&server.base_url());
    let flags = PhaseFlags::single(3, false, false).expect("flags");
    orchestrator
        .run_document(Path::new("atlas.pdf"), &flags)
        .await
        .expect("skip is not a failure");

    let log = harness.status_log();
    assert!(log.contains("PHASE: Embed | STATUS: SKIPPED"));
    assert!(log.contains("Missing chunk artifacts: atlas(1-2)"));
}

#[tokio::test]
async fn cleanup_removes_working_files_after_a_successful_run() {
    let server = MockServer::start_async().await;
    mock_collection_info(&server).await;
    mock_count(&server, 0).await;
    mock_retrieve_empty(&server).await;
    mock_upsert(&server).await;

    let harness = Harness::new();
    let source_dir = TempDir::new().expect("tempdir");
    let source = source_dir.path().join("cardiology.pdf");
    write_fixture_pdf(&source, 2);

    let orchestrator = harness.orchestrator(&server.base_url());
    orchestrator
        .run_document(&source, &PhaseFlags::full(false, true))
        .await
        .expect("run with cleanup");

    assert!(!harness.dirs.raw.join("cardiology.pdf").exists());
    assert!(!harness.dirs.splitted.join("cardiology.pdf").exists());
    assert!(!harness.dirs.parsed.join("cardiology_chunks.json").exists());
    assert!(
        harness
            .status_log()
            .contains("PHASE: Cleanup | STATUS: COMPLETED")
    );
}
