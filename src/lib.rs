//! # ocrflow
//!
//! OCR batches of PDF documents through a remote OCR service, then analyse
//! the recognised text with a remote LLM workflow.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF files
//!  │
//!  ├─ 1. Submit   register a task, spawn one background worker per batch
//!  ├─ 2. Render   rasterise pages one at a time via pdfium (spawn_blocking)
//!  ├─ 3. OCR      signed HTTP call per page; failures become page markers
//!  ├─ 4. Store    per-file results, progress and status in a TaskStore
//!  ├─ 5. Chunk    regroup page texts into K-page windows
//!  └─ 6. Relay    send chunks to the workflow endpoint; buffer or stream
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocrflow::{
//!     AnalysisService, InMemoryTaskStore, OcrEndpoint, Pipeline, PipelineConfig,
//!     TaskStore, WorkflowClient, WorkflowEndpoint,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().k_pages(5).build()?;
//!     let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
//!
//!     let ocr = OcrEndpoint::new("app-id", "api-key", "api-secret");
//!     let pipeline = Pipeline::remote(Arc::clone(&store), ocr, config.clone())?;
//!     let handle = pipeline.submit(vec!["report.pdf".into()])?;
//!     let task_id = handle.wait().await?;
//!
//!     let workflow = WorkflowClient::new(WorkflowEndpoint::new("token", "flow-id"))?;
//!     let analysis = AnalysisService::new(store, workflow, &config);
//!     let response = analysis.analyze_buffered(&task_id, config.k_pages).await?;
//!     println!("{}", response.analysis_result);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrflow` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocrflow = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod batch;
pub mod chunk;
pub mod config;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod progress;
pub mod relay;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{AnalysisEvent, AnalysisEventStream, AnalysisResponse, AnalysisService};
pub use batch::{BatchHandle, Pipeline};
pub use chunk::chunk_pages;
pub use config::{
    NoticeRewrite, OcrEndpoint, PipelineConfig, PipelineConfigBuilder, WorkflowEndpoint,
};
pub use error::{ErrorKind, FileError, OcrError, OcrFlowError, PageError, RelayError};
pub use export::ExportedArtifact;
pub use pipeline::ocr::{OcrEngine, RemoteOcrClient};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use relay::WorkflowClient;
pub use store::{
    AnalysisRecord, FileOutcome, FileResult, InMemoryTaskStore, PageResult, TaskId, TaskReport,
    TaskStatus, TaskStore,
};
