//! Per-file OCR extraction.
//!
//! Drives one file through the rasterizer and the OCR engine, strictly in
//! page order. Failures stay where they happen:
//!
//! | failure                         | recorded as                          |
//! |---------------------------------|--------------------------------------|
//! | page render / OCR call          | [`PageResult`] with a failure marker |
//! | file missing / not a PDF / load | [`FileResult`] error entry           |
//! | rendering engine unavailable    | `Err(OcrFlowError)`, batch-fatal     |
//!
//! Each rendered image is dropped (and its scratch file deleted) as soon as
//! its OCR call returns.

use crate::error::{OcrFlowError, PageError};
use crate::pipeline::input;
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::render::{PageRasterizer, RasterError, RasterEvent, RenderedPage};
use crate::progress::ProgressCallback;
use crate::store::{FileResult, PageResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of extracting one file.
#[derive(Debug)]
pub struct FileExtraction {
    pub result: FileResult,
    /// Cancellation stopped the file before its last page.
    pub interrupted: bool,
}

/// Runs rasterisation and OCR for single files.
#[derive(Clone)]
pub struct OcrExtractor {
    rasterizer: Arc<dyn PageRasterizer>,
    engine: Arc<dyn OcrEngine>,
    scratch_dir: PathBuf,
    progress: Option<ProgressCallback>,
}

impl OcrExtractor {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        engine: Arc<dyn OcrEngine>,
        scratch_dir: PathBuf,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            rasterizer,
            engine,
            scratch_dir,
            progress,
        }
    }

    /// Extract every page of `pdf`. `index` is the file's position in its batch.
    ///
    /// Only an unusable rendering engine is returned as `Err`; everything
    /// else ends up inside the returned [`FileResult`].
    pub async fn extract_file(
        &self,
        pdf: &Path,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<FileExtraction, OcrFlowError> {
        let filename = input::display_name(pdf);
        let stem = input::file_stem(pdf);

        if let Err(e) = input::validate_pdf(pdf) {
            warn!("Skipping {}: {}", filename, e);
            return Ok(self.file_failed(filename, index, e));
        }

        let mut pages = match self.rasterizer.open(pdf, &self.scratch_dir).await {
            Ok(p) => p,
            Err(RasterError::Unreadable(e)) => {
                warn!("Skipping {}: {}", filename, e);
                return Ok(self.file_failed(filename, index, e));
            }
            Err(RasterError::Engine(e)) => return Err(e),
        };

        let total_pages = pages.total_pages();
        info!("OCR {}: {} pages", filename, total_pages);
        if let Some(ref cb) = self.progress {
            cb.on_file_start(&filename, index, total_pages);
        }

        let mut results = Vec::with_capacity(total_pages);
        let mut interrupted = false;

        loop {
            if cancel.is_cancelled() {
                interrupted = results.len() < total_pages;
                break;
            }
            let Some(event) = pages.next().await else {
                break;
            };

            let page_result = match event {
                RasterEvent::Page(rendered) => self.recognize_page(&stem, &rendered).await,
                RasterEvent::PageFailed(e) => PageResult::failed(&stem, e),
            };

            if let Some(ref cb) = self.progress {
                match &page_result.error {
                    Some(e) => cb.on_page_error(&filename, page_result.page, e.reason()),
                    None => cb.on_page_complete(&filename, page_result.page, page_result.text.len()),
                }
            }
            results.push(page_result);
        }

        if !interrupted && results.len() < total_pages {
            warn!(
                "Renderer for {} stopped after {}/{} pages",
                filename,
                results.len(),
                total_pages
            );
            for page in results.len() + 1..=total_pages {
                let error = PageError::RenderFailed {
                    page,
                    detail: "renderer stopped before this page".into(),
                };
                if let Some(ref cb) = self.progress {
                    cb.on_page_error(&filename, page, error.reason());
                }
                results.push(PageResult::failed(&stem, error));
            }
        }

        if interrupted {
            info!(
                "OCR {} interrupted after {}/{} pages",
                filename,
                results.len(),
                total_pages
            );
        }

        let failed = results.iter().filter(|p| p.is_error()).count();
        debug!(
            "OCR {} done: {} pages, {} failed",
            filename,
            results.len(),
            failed
        );
        if let Some(ref cb) = self.progress {
            cb.on_file_complete(&filename, index, None);
        }

        Ok(FileExtraction {
            result: FileResult::pages(filename, results),
            interrupted,
        })
    }

    async fn recognize_page(&self, stem: &str, rendered: &RenderedPage) -> PageResult {
        let page = rendered.page();

        let image = match rendered.read().await {
            Ok(bytes) => bytes,
            Err(e) => {
                return PageResult::failed(
                    stem,
                    PageError::RenderFailed {
                        page,
                        detail: format!("reading scratch image: {e}"),
                    },
                )
            }
        };

        match self.engine.recognize(&image).await {
            Ok(text) => PageResult::recognized(stem, page, text),
            Err(e) => {
                warn!("Page {} of {}: {}", page, stem, e);
                PageResult::failed(
                    stem,
                    PageError::OcrFailed {
                        page,
                        detail: e.to_string(),
                    },
                )
            }
        }
    }

    fn file_failed(
        &self,
        filename: String,
        index: usize,
        error: impl std::fmt::Display,
    ) -> FileExtraction {
        let message = error.to_string();
        if let Some(ref cb) = self.progress {
            cb.on_file_complete(&filename, index, Some(&message));
        }
        FileExtraction {
            result: FileResult::error(filename, message),
            interrupted: false,
        }
    }
}
