//! Task tracking and result storage.
//!
//! A task is one OCR batch. Its lifecycle:
//!
//! ```text
//! processing ──► completed
//!      │    ├──► error
//!      │    └──► cancelled
//! ```
//!
//! Terminal states never change again: progress updates, status
//! transitions and file results aimed at a terminal task are ignored or
//! rejected. The analysis record is the one exception, because analysis
//! only ever runs against finished tasks.
//!
//! [`TaskStore`] is the seam the pipeline writes through; [`InMemoryTaskStore`]
//! is the process-local implementation. It keeps one mutex per task so that
//! concurrent batches never contend, and a status read always sees a
//! consistent `(status, progress, total)` triple.

use crate::error::{OcrFlowError, PageError};
use crate::export::ExportedArtifact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Opaque task identifier.
pub type TaskId = String;

/// Text substituted for a page that was processed but yielded no text.
pub const NO_TEXT_MARKER: &str = "[no text recognized]";

/// Text substituted for a page whose render or OCR call failed.
pub fn failure_marker(reason: &str) -> String {
    format!("[page failed: {reason}]")
}

// ── Result model ─────────────────────────────────────────────────────────

/// Outcome of one page. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-based page index within its file.
    pub page: usize,
    /// Stem of the source file, used in the page header.
    pub source: String,
    /// Recognised text, or one of the markers.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
    pub timestamp: DateTime<Utc>,
}

impl PageResult {
    /// A page whose OCR call succeeded. `None` becomes [`NO_TEXT_MARKER`].
    pub fn recognized(source: impl Into<String>, page: usize, text: Option<String>) -> Self {
        let text = text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| NO_TEXT_MARKER.to_string());
        Self {
            page,
            source: source.into(),
            text,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A page that failed to render or OCR.
    pub fn failed(source: impl Into<String>, error: PageError) -> Self {
        let page = match &error {
            PageError::RenderFailed { page, .. } | PageError::OcrFailed { page, .. } => *page,
        };
        Self {
            page,
            source: source.into(),
            text: failure_marker(error.reason()),
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The formatted block handed to the chunker.
    pub fn block(&self) -> String {
        format!("==== {} page {} ====\n{}", self.source, self.page, self.text)
    }
}

/// Page results for a file, or the single error that stopped it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOutcome {
    Pages(Vec<PageResult>),
    Error(String),
}

/// Outcome of one uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub filename: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
    pub timestamp: DateTime<Utc>,
}

impl FileResult {
    pub fn pages(filename: impl Into<String>, pages: Vec<PageResult>) -> Self {
        Self {
            filename: filename.into(),
            outcome: FileOutcome::Pages(pages),
            timestamp: Utc::now(),
        }
    }

    pub fn error(filename: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            filename: filename.into(),
            outcome: FileOutcome::Error(error.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, FileOutcome::Error(_))
    }

    /// Page results, empty for a failed file.
    pub fn page_results(&self) -> &[PageResult] {
        match &self.outcome {
            FileOutcome::Pages(p) => p,
            FileOutcome::Error(_) => &[],
        }
    }
}

/// The stored output of the latest analysis run for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub text: String,
    pub chunks_count: usize,
    pub k_pages: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ExportedArtifact>,
}

// ── Task status ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a status poll returns.
///
/// Serialises as `{"status": "processing", "progress": 1, "total": 3}`,
/// `{"status": "completed", "results": [...]}`, `{"status": "error",
/// "error": "..."}` or `{"status": "cancelled", ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskReport {
    Processing {
        progress: usize,
        total: usize,
    },
    Completed {
        results: Vec<FileResult>,
    },
    Error {
        error: String,
    },
    Cancelled {
        progress: usize,
        total: usize,
        results: Vec<FileResult>,
    },
}

impl TaskReport {
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskReport::Processing { .. } => TaskStatus::Processing,
            TaskReport::Completed { .. } => TaskStatus::Completed,
            TaskReport::Error { .. } => TaskStatus::Error,
            TaskReport::Cancelled { .. } => TaskStatus::Cancelled,
        }
    }
}

// ── Store abstraction ────────────────────────────────────────────────────

/// Task tracker and result store.
///
/// Every method addressing an unknown task fails with
/// [`OcrFlowError::UnknownTask`].
pub trait TaskStore: Send + Sync {
    /// Register a new task in `processing` with `total` expected files.
    fn create(&self, task_id: &str, total: usize) -> Result<(), OcrFlowError>;

    fn status(&self, task_id: &str) -> Result<TaskReport, OcrFlowError>;

    fn task_status(&self, task_id: &str) -> Result<TaskStatus, OcrFlowError>;

    /// Add one to `progress`, saturating at `total`. Returns the new value.
    fn advance_progress(&self, task_id: &str) -> Result<usize, OcrFlowError>;

    fn mark_completed(&self, task_id: &str) -> Result<(), OcrFlowError>;

    fn mark_error(&self, task_id: &str, error: &str) -> Result<(), OcrFlowError>;

    fn mark_cancelled(&self, task_id: &str) -> Result<(), OcrFlowError>;

    /// Append a file result. Rejected once the task is terminal.
    fn append_file_result(&self, task_id: &str, result: FileResult) -> Result<(), OcrFlowError>;

    /// Every page block across all files, in upload then page order.
    fn all_pages(&self, task_id: &str) -> Result<Vec<String>, OcrFlowError>;

    fn file_results(&self, task_id: &str) -> Result<Vec<FileResult>, OcrFlowError>;

    fn analysis_record(&self, task_id: &str) -> Result<Option<AnalysisRecord>, OcrFlowError>;

    /// Replace the task's analysis record.
    fn set_analysis_record(
        &self,
        task_id: &str,
        record: AnalysisRecord,
    ) -> Result<(), OcrFlowError>;

    /// Drop terminal tasks that finished at least `retention` ago.
    /// Returns how many were removed.
    fn evict_expired(&self, retention: Duration) -> usize;
}

#[derive(Debug)]
struct TaskEntry {
    status: TaskStatus,
    progress: usize,
    total: usize,
    error: Option<String>,
    results: Vec<FileResult>,
    analysis: Option<AnalysisRecord>,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn new(total: usize) -> Self {
        Self {
            status: TaskStatus::Processing,
            progress: 0,
            total,
            error: None,
            results: Vec::new(),
            analysis: None,
            finished_at: None,
        }
    }

    fn finish(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Instant::now());
        true
    }

    fn report(&self) -> TaskReport {
        match self.status {
            TaskStatus::Processing => TaskReport::Processing {
                progress: self.progress,
                total: self.total,
            },
            TaskStatus::Completed => TaskReport::Completed {
                results: self.results.clone(),
            },
            TaskStatus::Error => TaskReport::Error {
                error: self.error.clone().unwrap_or_default(),
            },
            TaskStatus::Cancelled => TaskReport::Cancelled {
                progress: self.progress,
                total: self.total,
                results: self.results.clone(),
            },
        }
    }
}

/// Process-local [`TaskStore`].
///
/// The outer lock is held only long enough to look up or insert a key;
/// every read and write of a task's state happens under that task's own
/// mutex.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<TaskEntry>>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently held.
    pub fn len(&self) -> usize {
        self.tasks.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, task_id: &str) -> Result<Arc<Mutex<TaskEntry>>, OcrFlowError> {
        let tasks = self.tasks.read().map_err(|_| poisoned(task_id))?;
        tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| OcrFlowError::UnknownTask {
                task_id: task_id.to_string(),
            })
    }

    fn with_task<R>(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TaskEntry) -> R,
    ) -> Result<R, OcrFlowError> {
        let entry = self.entry(task_id)?;
        let mut guard = entry.lock().map_err(|_| poisoned(task_id))?;
        Ok(f(&mut guard))
    }
}

fn poisoned(task_id: &str) -> OcrFlowError {
    OcrFlowError::StorageFailed {
        task_id: task_id.to_string(),
        detail: "task lock poisoned".into(),
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, task_id: &str, total: usize) -> Result<(), OcrFlowError> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned(task_id))?;
        if tasks.contains_key(task_id) {
            return Err(OcrFlowError::StorageFailed {
                task_id: task_id.to_string(),
                detail: "task already exists".into(),
            });
        }
        tasks.insert(task_id.to_string(), Arc::new(Mutex::new(TaskEntry::new(total))));
        debug!("Task {} created ({} files)", task_id, total);
        Ok(())
    }

    fn status(&self, task_id: &str) -> Result<TaskReport, OcrFlowError> {
        self.with_task(task_id, |t| t.report())
    }

    fn task_status(&self, task_id: &str) -> Result<TaskStatus, OcrFlowError> {
        self.with_task(task_id, |t| t.status)
    }

    fn advance_progress(&self, task_id: &str) -> Result<usize, OcrFlowError> {
        self.with_task(task_id, |t| {
            if !t.status.is_terminal() {
                t.progress = (t.progress + 1).min(t.total);
            }
            t.progress
        })
    }

    fn mark_completed(&self, task_id: &str) -> Result<(), OcrFlowError> {
        if self.with_task(task_id, |t| t.finish(TaskStatus::Completed))? {
            info!("Task {} completed", task_id);
        }
        Ok(())
    }

    fn mark_error(&self, task_id: &str, error: &str) -> Result<(), OcrFlowError> {
        let changed = self.with_task(task_id, |t| {
            let changed = t.finish(TaskStatus::Error);
            if changed {
                t.error = Some(error.to_string());
            }
            changed
        })?;
        if changed {
            info!("Task {} failed: {}", task_id, error);
        }
        Ok(())
    }

    fn mark_cancelled(&self, task_id: &str) -> Result<(), OcrFlowError> {
        if self.with_task(task_id, |t| t.finish(TaskStatus::Cancelled))? {
            info!("Task {} cancelled", task_id);
        }
        Ok(())
    }

    fn append_file_result(&self, task_id: &str, result: FileResult) -> Result<(), OcrFlowError> {
        self.with_task(task_id, |t| {
            if t.status.is_terminal() {
                return Err(OcrFlowError::StorageFailed {
                    task_id: task_id.to_string(),
                    detail: format!("task is already {}", t.status),
                });
            }
            t.results.push(result);
            Ok(())
        })?
    }

    fn all_pages(&self, task_id: &str) -> Result<Vec<String>, OcrFlowError> {
        self.with_task(task_id, |t| {
            t.results
                .iter()
                .flat_map(|f| f.page_results())
                .map(PageResult::block)
                .collect()
        })
    }

    fn file_results(&self, task_id: &str) -> Result<Vec<FileResult>, OcrFlowError> {
        self.with_task(task_id, |t| t.results.clone())
    }

    fn analysis_record(&self, task_id: &str) -> Result<Option<AnalysisRecord>, OcrFlowError> {
        self.with_task(task_id, |t| t.analysis.clone())
    }

    fn set_analysis_record(
        &self,
        task_id: &str,
        record: AnalysisRecord,
    ) -> Result<(), OcrFlowError> {
        self.with_task(task_id, |t| t.analysis = Some(record))
    }

    fn evict_expired(&self, retention: Duration) -> usize {
        let Ok(mut tasks) = self.tasks.write() else {
            return 0;
        };
        let before = tasks.len();
        tasks.retain(|_, entry| match entry.lock() {
            Ok(t) => !t.finished_at.is_some_and(|at| at.elapsed() >= retention),
            Err(_) => false,
        });
        let removed = before - tasks.len();
        if removed > 0 {
            info!("Evicted {} finished task(s)", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize, text: &str) -> PageResult {
        PageResult::recognized("doc", n, Some(text.to_string()))
    }

    #[test]
    fn recognized_page_uses_marker_for_empty_text() {
        assert_eq!(PageResult::recognized("a", 1, None).text, NO_TEXT_MARKER);
        assert_eq!(
            PageResult::recognized("a", 1, Some("  \n".into())).text,
            NO_TEXT_MARKER
        );
        assert_eq!(PageResult::recognized("a", 1, Some("x".into())).text, "x");
    }

    #[test]
    fn failed_page_carries_marker_and_error() {
        let p = PageResult::failed(
            "a",
            PageError::OcrFailed {
                page: 2,
                detail: "OCR API call failed with HTTP 500".into(),
            },
        );
        assert_eq!(p.page, 2);
        assert!(p.is_error());
        assert_eq!(p.text, "[page failed: OCR API call failed with HTTP 500]");
    }

    #[test]
    fn block_has_header_line() {
        assert_eq!(page(3, "hello").block(), "==== doc page 3 ====\nhello");
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let store = InMemoryTaskStore::new();
        store.create("t", 2).unwrap();
        assert_eq!(store.advance_progress("t").unwrap(), 1);
        assert_eq!(store.advance_progress("t").unwrap(), 2);
        assert_eq!(store.advance_progress("t").unwrap(), 2);
        match store.status("t").unwrap() {
            TaskReport::Processing { progress, total } => assert_eq!((progress, total), (2, 2)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn terminal_status_is_sticky() {
        let store = InMemoryTaskStore::new();
        store.create("t", 1).unwrap();
        store.mark_completed("t").unwrap();
        store.mark_error("t", "late failure").unwrap();
        store.mark_cancelled("t").unwrap();
        assert_eq!(store.task_status("t").unwrap(), TaskStatus::Completed);

        let err = store
            .append_file_result("t", FileResult::pages("late.pdf", vec![]))
            .unwrap_err();
        assert!(matches!(err, OcrFlowError::StorageFailed { .. }));
    }

    #[test]
    fn error_report_carries_message() {
        let store = InMemoryTaskStore::new();
        store.create("t", 1).unwrap();
        store.mark_error("t", "disk full").unwrap();
        let json = serde_json::to_value(store.status("t").unwrap()).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "disk full");
    }

    #[test]
    fn unknown_task_is_input_error() {
        let store = InMemoryTaskStore::new();
        let err = store.status("nope").unwrap_err();
        assert!(matches!(err, OcrFlowError::UnknownTask { .. }));
        assert!(store.all_pages("nope").is_err());
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let store = InMemoryTaskStore::new();
        store.create("t", 1).unwrap();
        assert!(store.create("t", 1).is_err());
    }

    #[test]
    fn all_pages_flattens_in_upload_order_and_skips_failed_files() {
        let store = InMemoryTaskStore::new();
        store.create("t", 3).unwrap();
        store
            .append_file_result("t", FileResult::pages("a.pdf", vec![page(1, "a1"), page(2, "a2")]))
            .unwrap();
        store
            .append_file_result("t", FileResult::error("bad.pdf", "unreadable"))
            .unwrap();
        store
            .append_file_result("t", FileResult::pages("b.pdf", vec![page(1, "b1")]))
            .unwrap();

        let pages = store.all_pages("t").unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].ends_with("a1"));
        assert!(pages[1].ends_with("a2"));
        assert!(pages[2].ends_with("b1"));
        assert_eq!(store.file_results("t").unwrap().len(), 3);
    }

    #[test]
    fn completed_report_serialises_results() {
        let store = InMemoryTaskStore::new();
        store.create("t", 1).unwrap();
        store
            .append_file_result("t", FileResult::pages("a.pdf", vec![page(1, "x")]))
            .unwrap();
        store
            .append_file_result("t", FileResult::error("b.pdf", "not a pdf"))
            .unwrap();
        store.mark_completed("t").unwrap();

        let json = serde_json::to_value(store.status("t").unwrap()).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["results"][0]["filename"], "a.pdf");
        assert_eq!(json["results"][0]["pages"][0]["text"], "x");
        assert_eq!(json["results"][1]["error"], "not a pdf");
    }

    #[test]
    fn analysis_record_is_replaced() {
        let store = InMemoryTaskStore::new();
        store.create("t", 1).unwrap();
        store.mark_completed("t").unwrap();
        assert!(store.analysis_record("t").unwrap().is_none());

        for text in ["first", "second"] {
            store
                .set_analysis_record(
                    "t",
                    AnalysisRecord {
                        text: text.into(),
                        chunks_count: 1,
                        k_pages: 5,
                        created_at: Utc::now(),
                        artifact: None,
                    },
                )
                .unwrap();
        }
        assert_eq!(store.analysis_record("t").unwrap().unwrap().text, "second");
    }

    #[test]
    fn eviction_only_drops_finished_tasks() {
        let store = InMemoryTaskStore::new();
        store.create("running", 1).unwrap();
        store.create("done", 1).unwrap();
        store.mark_completed("done").unwrap();

        assert_eq!(store.evict_expired(Duration::from_secs(3600)), 0);
        assert_eq!(store.evict_expired(Duration::ZERO), 1);
        assert_eq!(store.len(), 1);
        assert!(store.status("running").is_ok());
        assert!(matches!(
            store.status("done"),
            Err(OcrFlowError::UnknownTask { .. })
        ));
    }
}
