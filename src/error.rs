//! Error types for the ocrflow library.
//!
//! Failures are split by the boundary they are isolated at:
//!
//! * [`OcrFlowError`]: **Fatal** to the immediate caller: bad input (no
//!   files, unknown task, `k = 0`), invalid configuration, or a batch-fatal
//!   condition such as a storage failure. Returned as `Err(OcrFlowError)`.
//!
//! * [`FileError`]: **File-scoped**: one uploaded file could not be opened
//!   or rasterised at all. Recorded as that file's [`crate::store::FileResult`]
//!   and the batch moves on to the next file.
//!
//! * [`PageError`]: **Page-scoped**: a single page failed to render or the
//!   OCR call for it failed. Stored inside [`crate::store::PageResult`].
//!
//! * [`OcrError`] / [`RelayError`]: **Remote service** failures from the OCR
//!   endpoint or the analysis workflow endpoint. They are converted into a
//!   `PageError` or a diagnostic string at the slot they would have filled.
//!
//! Every type exposes [`ErrorKind`] through `kind()` so callers can branch on
//! the taxonomy without matching on messages.

use std::path::PathBuf;
use thiserror::Error;

/// The failure taxonomy shared by every error type in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller supplied something invalid. Reported synchronously, never retried.
    Input,
    /// A single page failed; recorded as that page's result.
    PageExtraction,
    /// A whole file failed; recorded as that file's result.
    FileExtraction,
    /// The batch cannot continue; the task moves to `error`.
    BatchFatal,
    /// A remote endpoint was unreachable or answered with a failure.
    RemoteService,
}

/// Errors that propagate to the immediate caller of an operation.
#[derive(Debug, Error)]
pub enum OcrFlowError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// A batch was submitted with an empty file list.
    #[error("No input files were provided")]
    NoInputFiles,

    /// The chunk size must be at least one page.
    #[error("Invalid chunk size {k}: pages per chunk must be >= 1")]
    InvalidChunkSize { k: usize },

    /// No task exists with this identifier (never created, or evicted).
    #[error("Unknown task '{task_id}'")]
    UnknownTask { task_id: String },

    /// The task exists but has not reached a state that allows analysis.
    #[error("Task '{task_id}' is not ready for analysis (status: {status})")]
    TaskNotReady { task_id: String, status: String },

    /// The task finished but produced no page text to analyse.
    #[error("Task '{task_id}' has no page content to analyse")]
    NoContent { task_id: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An endpoint URL is malformed (missing `://` or a path).
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    // ── Batch-fatal errors ────────────────────────────────────────────────
    /// The result store rejected a write for this task.
    #[error("Storage failure for task '{task_id}': {detail}")]
    StorageFailed { task_id: String, detail: String },

    /// The PDF rendering engine could not be loaded.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH to the directory containing libpdfium, or install it system-wide."
    )]
    PdfiumBindingFailed(String),

    /// Could not create or write a file owned by the pipeline.
    #[error("Failed to write '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OcrFlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrFlowError::NoInputFiles
            | OcrFlowError::InvalidChunkSize { .. }
            | OcrFlowError::UnknownTask { .. }
            | OcrFlowError::TaskNotReady { .. }
            | OcrFlowError::NoContent { .. }
            | OcrFlowError::InvalidConfig(_)
            | OcrFlowError::InvalidEndpoint { .. } => ErrorKind::Input,
            OcrFlowError::StorageFailed { .. }
            | OcrFlowError::PdfiumBindingFailed(_)
            | OcrFlowError::WriteFailed { .. }
            | OcrFlowError::Internal(_) => ErrorKind::BatchFatal,
        }
    }
}

/// A whole file could not be processed.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum FileError {
    /// The file is missing from local storage.
    #[error("PDF file not found: '{path}'")]
    NotFound { path: PathBuf },

    /// The file exists but does not start with the `%PDF` magic bytes.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// pdfium refused to open the document (corrupt, encrypted, truncated).
    #[error("PDF '{path}' is unreadable: {detail}")]
    DocumentUnreadable { path: PathBuf, detail: String },
}

impl FileError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::FileExtraction
    }
}

/// A non-fatal error for a single page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Rasterising the page failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The OCR call for the page failed.
    #[error("Page {page}: OCR failed: {detail}")]
    OcrFailed { page: usize, detail: String },
}

impl PageError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PageExtraction
    }

    /// The human-readable reason without the page prefix, used for markers.
    pub fn reason(&self) -> &str {
        match self {
            PageError::RenderFailed { detail, .. } | PageError::OcrFailed { detail, .. } => detail,
        }
    }
}

/// Failures talking to the OCR endpoint.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The request never produced a response (DNS, TLS, timeout, reset).
    #[error("OCR transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-200 HTTP status.
    #[error("OCR API call failed with HTTP {status}")]
    Http { status: u16 },

    /// The endpoint answered 200 but reported a non-zero service code.
    #[error("OCR service returned code {code}: {message}")]
    Service { code: i64, message: String },

    /// The response body could not be decoded.
    #[error("OCR response could not be decoded: {0}")]
    Decode(String),

    /// The request could not be built (bad endpoint, I/O on the image).
    #[error(transparent)]
    Request(#[from] OcrFlowError),
}

impl OcrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OcrError::Request(e) => e.kind(),
            _ => ErrorKind::RemoteService,
        }
    }
}

/// Failures talking to the analysis workflow endpoint.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connecting, sending, or reading the response body failed.
    #[error("workflow transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("workflow API call failed with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A non-streaming response body was not valid JSON.
    #[error("workflow response could not be decoded: {0}")]
    Decode(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RemoteService
    }

    /// The diagnostic string substituted for the analysis output.
    pub fn diagnostic(&self) -> String {
        format!("API call error: {self}")
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}
