//! Progress-callback trait for batch OCR events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the background worker walks through files and pages. The same
//! counters are also visible by polling [`crate::store::TaskStore::status`];
//! the callback is for observers that want push-style updates (a terminal
//! progress bar, a websocket, a log line per page).
//!
//! # Example
//!
//! ```rust
//! use ocrflow::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter {
//!     pages: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for PageCounter {
//!     fn on_page_complete(&self, _file: &str, page: usize, text_len: usize) {
//!         self.pages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page}: {text_len} chars");
//!     }
//! }
//!
//! let counter = Arc::new(PageCounter { pages: AtomicUsize::new(0) });
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch worker as it processes files and pages.
///
/// Every method has a no-op default. Batches run on their own tokio task,
/// so implementations must be `Send + Sync`; two concurrent batches sharing
/// one callback will call it from different threads.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first file is opened.
    fn on_batch_start(&self, task_id: &str, total_files: usize) {
        let _ = (task_id, total_files);
    }

    /// Called when a file has been opened and its page count is known.
    fn on_file_start(&self, file: &str, index: usize, total_pages: usize) {
        let _ = (file, index, total_pages);
    }

    /// Called after a page produced text (or the empty-page marker).
    fn on_page_complete(&self, file: &str, page: usize, text_len: usize) {
        let _ = (file, page, text_len);
    }

    /// Called after a page failed to render or OCR.
    fn on_page_error(&self, file: &str, page: usize, error: &str) {
        let _ = (file, page, error);
    }

    /// Called once a file has been fully attempted. `error` is set when the
    /// whole file could not be processed.
    fn on_file_complete(&self, file: &str, index: usize, error: Option<&str>) {
        let _ = (file, index, error);
    }

    /// Called once the batch reached a terminal status.
    fn on_batch_complete(&self, task_id: &str, status: &str) {
        let _ = (task_id, status);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
