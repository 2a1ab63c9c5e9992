//! PDF rasterisation: render every page of a file into scratch PNG files.
//!
//! pdfium is not async-safe, so a document is opened and rendered on a
//! `spawn_blocking` thread. With the `thread_safe` feature a live `Pdfium`
//! holds a process-wide lock, so the document is rendered completely and
//! pdfium dropped before [`PageRasterizer::open`] returns. OCR calls never run
//! while the lock is held, and other batches can render in the meantime.
//!
//! Each rendered page lives in a [`tempfile::NamedTempFile`] inside the
//! scratch directory. Dropping the [`RenderedPage`] removes the file, so
//! cleanup happens on every exit path: success, OCR error, cancellation or a
//! panic in the consumer.

use crate::error::{FileError, OcrFlowError, PageError};
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One rendered page, backed by a scratch file that is deleted on drop.
#[derive(Debug)]
pub struct RenderedPage {
    page: usize,
    image: NamedTempFile,
}

impl RenderedPage {
    /// Wrap a scratch file holding the image for 1-based `page`.
    pub fn new(page: usize, image: NamedTempFile) -> Self {
        Self { page, image }
    }

    /// 1-based page number.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn path(&self) -> &Path {
        self.image.path()
    }

    /// Read the encoded image back for upload.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.image.path()).await
    }
}

/// What the renderer produces for each page, in page order.
#[derive(Debug)]
pub enum RasterEvent {
    Page(RenderedPage),
    PageFailed(PageError),
}

/// An opened document streaming its rendered pages.
#[derive(Debug)]
pub struct RasterPages {
    total_pages: usize,
    rx: mpsc::Receiver<RasterEvent>,
}

impl RasterPages {
    pub fn new(total_pages: usize, rx: mpsc::Receiver<RasterEvent>) -> Self {
        Self { total_pages, rx }
    }

    /// Pages that are already rendered. Undelivered pages are deleted when
    /// this value is dropped.
    pub fn from_events(events: Vec<RasterEvent>) -> Self {
        let total_pages = events.len();
        let (tx, rx) = mpsc::channel(total_pages.max(1));
        for event in events {
            // Capacity equals the event count, so this cannot be full.
            let _ = tx.try_send(event);
        }
        Self::new(total_pages, rx)
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Next page in increasing index order, or `None` once all pages are out.
    pub async fn next(&mut self) -> Option<RasterEvent> {
        self.rx.recv().await
    }
}

/// Why a document could not be opened.
#[derive(Debug)]
pub enum RasterError {
    /// This file cannot be opened; other files may still work.
    Unreadable(FileError),
    /// The rendering engine itself is unavailable; no file can work.
    Engine(OcrFlowError),
}

/// Opens a PDF and renders its pages for OCR.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn open(&self, pdf: &Path, scratch_dir: &Path) -> Result<RasterPages, RasterError>;
}

/// [`PageRasterizer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    scale: f32,
    lib_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// `scale` is the upscale factor applied to each page (2.0 doubles both edges).
    pub fn new(scale: f32, lib_path: Option<PathBuf>) -> Self {
        Self { scale, lib_path }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }
}

#[async_trait]
impl PageRasterizer for PdfiumRasterizer {
    async fn open(&self, pdf: &Path, scratch_dir: &Path) -> Result<RasterPages, RasterError> {
        let path = pdf.to_path_buf();
        let scratch = scratch_dir.to_path_buf();
        let scale = self.scale;
        let lib_path = self.lib_path.clone();

        let events = tokio::task::spawn_blocking(move || {
            render_pages_blocking(&path, &scratch, scale, lib_path.as_deref())
        })
        .await
        .map_err(|e| {
            RasterError::Engine(OcrFlowError::Internal(format!("Render task panicked: {e}")))
        })??;

        Ok(RasterPages::from_events(events))
    }
}

/// Bind pdfium from `lib_dir`, `PDFIUM_LIB_PATH`, or the system library.
fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, OcrFlowError> {
    let env_dir = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
    let bindings = match lib_dir.map(Path::to_path_buf).or(env_dir) {
        Some(dir) => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| OcrFlowError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Blocking implementation of page rendering.
///
/// The whole document is rendered to scratch files before returning, so the
/// pdfium instance (and its process-wide lock) is released before any page
/// reaches the network.
fn render_pages_blocking(
    pdf_path: &Path,
    scratch_dir: &Path,
    scale: f32,
    lib_dir: Option<&Path>,
) -> Result<Vec<RasterEvent>, RasterError> {
    let pdfium = bind_pdfium(lib_dir).map_err(RasterError::Engine)?;

    let document = pdfium.load_pdf_from_file(pdf_path, None).map_err(|e| {
        RasterError::Unreadable(FileError::DocumentUnreadable {
            path: pdf_path.to_path_buf(),
            detail: format!("{:?}", e),
        })
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} ({} pages)", pdf_path.display(), total_pages);

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let events = render_all(total_pages, |idx| {
        render_one(&pages, idx, &render_config, scratch_dir)
    });

    debug!(
        "Rendered {} pages of {}; releasing pdfium",
        events.len(),
        pdf_path.display()
    );
    Ok(events)
}

/// Render `total_pages` pages in index order. A page that fails becomes a
/// [`RasterEvent::PageFailed`] and rendering moves on.
fn render_all(
    total_pages: usize,
    mut render: impl FnMut(usize) -> Result<NamedTempFile, String>,
) -> Vec<RasterEvent> {
    (0..total_pages)
        .map(|idx| {
            let page_num = idx + 1;
            match render(idx) {
                Ok(image) => RasterEvent::Page(RenderedPage::new(page_num, image)),
                Err(detail) => {
                    warn!("Page {}: rasterisation failed: {}", page_num, detail);
                    RasterEvent::PageFailed(PageError::RenderFailed {
                        page: page_num,
                        detail,
                    })
                }
            }
        })
        .collect()
}

/// Render page `idx` (0-based) and write it to a scratch PNG.
fn render_one(
    pages: &PdfPages,
    idx: usize,
    render_config: &PdfRenderConfig,
    scratch_dir: &Path,
) -> Result<NamedTempFile, String> {
    let page = pages.get(idx as u16).map_err(|e| format!("{:?}", e))?;
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| format!("{:?}", e))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        idx + 1,
        image.width(),
        image.height()
    );

    let png = encode::encode_png(&image).map_err(|e| format!("PNG encoding failed: {e}"))?;

    let mut file = tempfile::Builder::new()
        .prefix(&format!("page_{}_", idx + 1))
        .suffix(".png")
        .tempfile_in(scratch_dir)
        .map_err(|e| format!("scratch file: {e}"))?;
    file.write_all(&png)
        .map_err(|e| format!("scratch write: {e}"))?;

    Ok(file)
}
