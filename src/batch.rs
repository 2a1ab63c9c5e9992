//! Batch orchestration: one background worker per submitted batch.
//!
//! [`Pipeline::submit`] registers a task, spawns a tokio task that walks
//! the files sequentially, and returns immediately with a [`BatchHandle`].
//! Callers then poll [`Pipeline::status`] (or the store directly), wait on
//! the handle, or cancel it.
//!
//! ## Terminal status
//!
//! | how the worker ends                         | status      |
//! |---------------------------------------------|-------------|
//! | every file attempted                        | `completed` |
//! | cancellation observed between pages/files   | `cancelled` |
//! | store write failed, pdfium unavailable, panic | `error`   |
//!
//! Page and file failures never end a batch; they are recorded as data.

use crate::config::{OcrEndpoint, PipelineConfig};
use crate::error::OcrFlowError;
use crate::pipeline::extract::OcrExtractor;
use crate::pipeline::ocr::{OcrEngine, RemoteOcrClient};
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use crate::store::{TaskId, TaskReport, TaskStatus, TaskStore};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Entry point for OCR batches.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn TaskStore>,
    extractor: OcrExtractor,
    config: PipelineConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn TaskStore>,
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn OcrEngine>,
        config: PipelineConfig,
    ) -> Self {
        let extractor = OcrExtractor::new(
            rasterizer,
            engine,
            config.scratch_dir(),
            config.progress_callback.clone(),
        );
        Self {
            store,
            extractor,
            config,
        }
    }

    /// A pipeline rendering with pdfium and recognising with the remote
    /// OCR endpoint.
    pub fn remote(
        store: Arc<dyn TaskStore>,
        endpoint: OcrEndpoint,
        config: PipelineConfig,
    ) -> Result<Self, OcrFlowError> {
        let rasterizer = PdfiumRasterizer::new(config.render_scale, config.pdfium_lib_path.clone());
        let engine = RemoteOcrClient::new(endpoint)?;
        Ok(Self::new(store, Arc::new(rasterizer), Arc::new(engine), config))
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Accept a batch of PDF paths and start OCR in the background.
    ///
    /// Must be called from within a tokio runtime. Expired finished tasks
    /// are evicted first.
    pub fn submit(&self, files: Vec<PathBuf>) -> Result<BatchHandle, OcrFlowError> {
        if files.is_empty() {
            return Err(OcrFlowError::NoInputFiles);
        }

        self.store.evict_expired(self.config.retention);

        let task_id: TaskId = uuid::Uuid::new_v4().to_string();
        self.store.create(&task_id, files.len())?;
        info!("Task {}: accepted {} file(s)", task_id, files.len());

        let cancel = CancellationToken::new();
        let worker = BatchWorker {
            store: Arc::clone(&self.store),
            extractor: self.extractor.clone(),
            config: self.config.clone(),
            task_id: task_id.clone(),
            files,
            cancel: cancel.clone(),
        };
        let join = tokio::spawn(worker.run());

        Ok(BatchHandle {
            task_id,
            cancel,
            join,
        })
    }

    pub fn status(&self, task_id: &str) -> Result<TaskReport, OcrFlowError> {
        self.store.status(task_id)
    }
}

/// Handle to a running batch.
#[derive(Debug)]
pub struct BatchHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl BatchHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Ask the worker to stop at the next page boundary. Results so far are
    /// kept and the task ends as `cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait until the worker has recorded a terminal status.
    pub async fn wait(self) -> Result<TaskId, OcrFlowError> {
        self.join
            .await
            .map_err(|e| OcrFlowError::Internal(format!("batch worker: {e}")))?;
        Ok(self.task_id)
    }
}

enum BatchEnd {
    Completed,
    Cancelled,
}

struct BatchWorker {
    store: Arc<dyn TaskStore>,
    extractor: OcrExtractor,
    config: PipelineConfig,
    task_id: TaskId,
    files: Vec<PathBuf>,
    cancel: CancellationToken,
}

impl BatchWorker {
    async fn run(self) {
        let outcome = match AssertUnwindSafe(self.start_and_process()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(OcrFlowError::Internal("batch worker panicked".into())),
        };

        let recorded = match outcome {
            Ok(BatchEnd::Completed) => self.store.mark_completed(&self.task_id),
            Ok(BatchEnd::Cancelled) => self.store.mark_cancelled(&self.task_id),
            Err(e) => {
                error!("Task {}: {}", self.task_id, e);
                self.store.mark_error(&self.task_id, &e.to_string())
            }
        };
        if let Err(e) = recorded {
            error!("Task {}: could not record final status: {}", self.task_id, e);
        }

        if let Some(ref cb) = self.config.progress_callback {
            let status = self
                .store
                .task_status(&self.task_id)
                .unwrap_or(TaskStatus::Error);
            let notified = std::panic::catch_unwind(AssertUnwindSafe(|| {
                cb.on_batch_complete(&self.task_id, status.as_str())
            }));
            if notified.is_err() {
                warn!("Task {}: progress callback panicked on completion", self.task_id);
            }
        }
    }

    /// Everything a panic may escape from: user callbacks and file processing.
    async fn start_and_process(&self) -> Result<BatchEnd, OcrFlowError> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(&self.task_id, self.files.len());
        }
        self.process_files().await
    }

    async fn process_files(&self) -> Result<BatchEnd, OcrFlowError> {
        for (index, path) in self.files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!(
                    "Task {}: cancelled before file {}/{}",
                    self.task_id,
                    index + 1,
                    self.files.len()
                );
                return Ok(BatchEnd::Cancelled);
            }

            let extraction = self
                .extractor
                .extract_file(path, index, &self.cancel)
                .await?;
            self.store
                .append_file_result(&self.task_id, extraction.result)?;

            if extraction.interrupted {
                return Ok(BatchEnd::Cancelled);
            }

            let progress = self.store.advance_progress(&self.task_id)?;
            debug!(
                "Task {}: {}/{} files",
                self.task_id,
                progress,
                self.files.len()
            );

            if self.config.delete_sources {
                remove_source(path).await;
            }
        }
        Ok(BatchEnd::Completed)
    }
}

async fn remove_source(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed source {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove source {}: {}", path.display(), e),
    }
}
