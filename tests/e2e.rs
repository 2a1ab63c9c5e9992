//! End-to-end tests against real pdfium and the live remote services.
//!
//! These tests use real PDF files in `./test_cases/`, a pdfium library, and
//! live OCR / workflow credentials. They are gated behind the `E2E_ENABLED`
//! environment variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! Credentials are read from the same variables as the CLI:
//! `OCRFLOW_APP_ID`, `OCRFLOW_API_KEY`, `OCRFLOW_API_SECRET` for OCR and
//! `OCRFLOW_WORKFLOW_TOKEN`, `OCRFLOW_FLOW_ID` for analysis.

use futures::StreamExt;
use ocrflow::{
    AnalysisEvent, AnalysisService, InMemoryTaskStore, OcrEndpoint, PageRasterizer,
    PdfiumRasterizer, Pipeline, PipelineConfig, TaskReport, TaskStore, WorkflowClient,
    WorkflowEndpoint,
};
use ocrflow::pipeline::render::RasterEvent;
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn sample_pdf() -> PathBuf {
    std::env::var("OCRFLOW_SAMPLE_PDF")
        .map(PathBuf::from)
        .unwrap_or_else(|_| test_cases_dir().join("sample.pdf"))
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Read an environment variable or skip the test.
macro_rules! env_or_skip {
    ($name:expr) => {{
        match std::env::var($name) {
            Ok(v) if !v.is_empty() => v,
            _ => {
                println!("SKIP: {} is not set", $name);
                return;
            }
        }
    }};
}

fn ocr_endpoint() -> Option<OcrEndpoint> {
    let var = |n| std::env::var(n).ok().filter(|v: &String| !v.is_empty());
    let mut endpoint = OcrEndpoint::new(
        var("OCRFLOW_APP_ID")?,
        var("OCRFLOW_API_KEY")?,
        var("OCRFLOW_API_SECRET")?,
    );
    if let Some(url) = var("OCRFLOW_OCR_URL") {
        endpoint = endpoint.with_url(url);
    }
    Some(endpoint)
}

/// Copy the sample into a scratch dir so source deletion cannot touch it.
fn staged_copy(src: &PathBuf, dir: &tempfile::TempDir) -> PathBuf {
    let dst = dir.path().join(src.file_name().unwrap());
    std::fs::copy(src, &dst).unwrap();
    dst
}

// ── Rasterisation (pdfium only, no network) ─────────────────────────────────

#[tokio::test]
async fn test_pdfium_renders_every_page_as_png() {
    let path = e2e_skip_unless_ready!(sample_pdf());
    let scratch = tempfile::tempdir().unwrap();

    let lib_path = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
    let rasterizer = PdfiumRasterizer::new(1.0, lib_path);
    let mut pages = rasterizer
        .open(&path, scratch.path())
        .await
        .expect("open() should succeed");
    let total = pages.total_pages();
    assert!(total > 0, "sample PDF has no pages");

    let mut seen = 0;
    while let Some(event) = pages.next().await {
        match event {
            RasterEvent::Page(page) => {
                seen += 1;
                assert_eq!(page.page(), seen, "pages must arrive in order");
                let bytes = page.read().await.unwrap();
                assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
                let file = page.path().to_path_buf();
                drop(page);
                assert!(!file.exists(), "scratch image should be deleted on drop");
            }
            RasterEvent::PageFailed(e) => panic!("page failed: {e}"),
        }
    }
    assert_eq!(seen, total);
    println!("Rendered {total} pages");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pdfium_is_released_while_pages_are_held() {
    let path = e2e_skip_unless_ready!(sample_pdf());
    let scratch = tempfile::tempdir().unwrap();
    let lib_path = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
    let rasterizer = PdfiumRasterizer::new(1.0, lib_path);

    // Hold the first document's pages as a slow OCR consumer would.
    let mut first = rasterizer.open(&path, scratch.path()).await.unwrap();
    let _held = first.next().await;

    let second = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        rasterizer.open(&path, scratch.path()),
    )
    .await
    .expect("second open must not wait for the first consumer")
    .unwrap();
    assert_eq!(second.total_pages(), first.total_pages());
}

// ── Live OCR ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_ocr_batch() {
    let path = e2e_skip_unless_ready!(sample_pdf());
    let Some(endpoint) = ocr_endpoint() else {
        println!("SKIP: OCR credentials are not set");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let staged = staged_copy(&path, &dir);
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let config = PipelineConfig::builder()
        .scratch_dir(dir.path())
        .render_scale(1.5)
        .build()
        .unwrap();

    let pipeline = Pipeline::remote(Arc::clone(&store), endpoint, config).unwrap();
    let task_id = pipeline.submit(vec![staged.clone()]).unwrap().wait().await.unwrap();

    let TaskReport::Completed { results } = store.status(&task_id).unwrap() else {
        panic!("task did not complete: {:?}", store.status(&task_id));
    };
    let pages = results[0].page_results();
    assert!(!pages.is_empty());
    let recognised = pages.iter().filter(|p| !p.is_error()).count();
    assert!(recognised > 0, "no page was recognised");
    assert!(!staged.exists(), "source should be consumed");

    for block in store.all_pages(&task_id).unwrap().iter().take(2) {
        println!("{block}\n");
    }
}

// ── Live analysis ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_live_ocr_then_streamed_analysis() {
    let path = e2e_skip_unless_ready!(sample_pdf());
    let Some(endpoint) = ocr_endpoint() else {
        println!("SKIP: OCR credentials are not set");
        return;
    };
    let token = env_or_skip!("OCRFLOW_WORKFLOW_TOKEN");
    let flow_id = env_or_skip!("OCRFLOW_FLOW_ID");

    let dir = tempfile::tempdir().unwrap();
    let staged = staged_copy(&path, &dir);
    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
    let config = PipelineConfig::builder()
        .scratch_dir(dir.path())
        .export_dir(dir.path().join("out"))
        .k_pages(3)
        .build()
        .unwrap();

    let pipeline = Pipeline::remote(Arc::clone(&store), endpoint, config.clone()).unwrap();
    let task_id = pipeline.submit(vec![staged]).unwrap().wait().await.unwrap();

    let mut workflow = WorkflowEndpoint::new(token, flow_id);
    if let Ok(url) = std::env::var("OCRFLOW_WORKFLOW_URL") {
        workflow = workflow.with_url(url);
    }
    let service = AnalysisService::new(
        Arc::clone(&store),
        WorkflowClient::new(workflow).unwrap(),
        &config,
    );

    let events: Vec<AnalysisEvent> = service
        .analyze_stream(&task_id, config.k_pages)
        .unwrap()
        .collect()
        .await;
    assert!(matches!(events.first(), Some(AnalysisEvent::Init { .. })));
    match events.last() {
        Some(AnalysisEvent::Done) => {}
        other => panic!("analysis did not finish cleanly: {other:?}"),
    }

    let record = store.analysis_record(&task_id).unwrap().expect("record stored");
    assert!(!record.text.trim().is_empty());
    let artifact = record.artifact.expect("analysis exported");
    assert!(dir.path().join("out").join(&artifact.filename).exists());

    println!("Analysis ({} chars):\n{}", record.text.len(), record.text);
}
