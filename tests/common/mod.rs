//! Shared fakes and mock servers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use ocrflow::error::{FileError, OcrError};
use ocrflow::pipeline::render::{RasterError, RasterEvent, RasterPages, RenderedPage};
use ocrflow::{OcrEngine, PageRasterizer};
use serde_json::Value;
use std::convert::Infallible;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Route library logs to the test harness. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ── Fake PDFs ────────────────────────────────────────────────────────────────

/// Write a fake PDF: a `%PDF` header line followed by one line per page.
///
/// [`LineRasterizer`] turns each line into a "rendered" page whose image
/// bytes are the line itself.
pub fn write_pdf(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut body = String::from("%PDF-1.7\n");
    for p in pages {
        body.push_str(p);
        body.push('\n');
    }
    std::fs::write(&path, body).unwrap();
    path
}

/// A file with PDF magic bytes that the rasterizer refuses to open.
pub fn write_corrupt_pdf(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, "%PDF-1.7\nCORRUPT\n").unwrap();
    path
}

/// Renders one page per line of a fake PDF.
pub struct LineRasterizer;

#[async_trait]
impl PageRasterizer for LineRasterizer {
    async fn open(&self, pdf: &Path, scratch: &Path) -> Result<RasterPages, RasterError> {
        let unreadable = |detail: String| {
            RasterError::Unreadable(FileError::DocumentUnreadable {
                path: pdf.to_path_buf(),
                detail,
            })
        };
        let content = std::fs::read_to_string(pdf).map_err(|e| unreadable(e.to_string()))?;
        if content.contains("CORRUPT") {
            return Err(unreadable("xref table is damaged".into()));
        }

        let pages: Vec<String> = content.lines().skip(1).map(str::to_string).collect();
        let total = pages.len();
        let scratch = scratch.to_path_buf();
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            for (i, text) in pages.into_iter().enumerate() {
                let mut f = tempfile::NamedTempFile::new_in(&scratch).unwrap();
                f.write_all(text.as_bytes()).unwrap();
                if tx
                    .send(RasterEvent::Page(RenderedPage::new(i + 1, f)))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(RasterPages::new(total, rx))
    }
}

/// A rasterizer whose engine is missing.
pub struct BrokenEngineRasterizer;

#[async_trait]
impl PageRasterizer for BrokenEngineRasterizer {
    async fn open(&self, _pdf: &Path, _scratch: &Path) -> Result<RasterPages, RasterError> {
        Err(RasterError::Engine(
            ocrflow::OcrFlowError::PdfiumBindingFailed("libpdfium.so not found".into()),
        ))
    }
}

/// OCR engine that reads the page line back.
///
/// `FAIL` answers HTTP 500, `EMPTY` recognises nothing, anything else is
/// returned as the page text. Each call sleeps for `delay`.
pub struct ScriptedOcr {
    pub delay: Duration,
}

impl ScriptedOcr {
    pub fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn slow(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
        }
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn recognize(&self, image: &[u8]) -> Result<Option<String>, OcrError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match std::str::from_utf8(image).unwrap_or_default() {
            "FAIL" => Err(OcrError::Http { status: 500 }),
            "EMPTY" => Ok(None),
            text => Ok(Some(text.to_string())),
        }
    }
}

// ── Mock workflow endpoint ───────────────────────────────────────────────────

/// One request received by a mock server.
#[derive(Debug, Clone)]
pub struct Received {
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    content_type: &'static str,
    body: String,
    received: Arc<Mutex<Vec<Received>>>,
}

async fn canned(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state
        .received
        .lock()
        .unwrap()
        .push(Received { headers, body });
    (
        state.status,
        [(header::CONTENT_TYPE, state.content_type)],
        state.body.clone(),
    )
        .into_response()
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

/// Serve `body` with `status` at `POST <base>/workflow`.
pub async fn spawn_workflow(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<String>,
) -> (String, Arc<Mutex<Vec<Received>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        status,
        content_type,
        body: body.into(),
        received: Arc::clone(&received),
    };
    let app = Router::new()
        .route("/workflow", post(canned))
        .with_state(state);
    let base = serve(app).await;
    (format!("{base}/workflow"), received)
}

/// Serve an SSE body at `POST <base>/workflow`.
pub async fn spawn_sse_workflow(body: impl Into<String>) -> (String, Arc<Mutex<Vec<Received>>>) {
    spawn_workflow(StatusCode::OK, "text/event-stream", body).await
}

/// A `data:` line carrying one delta fragment.
pub fn delta_frame(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
    )
}

fn endless_frames() -> impl Stream<Item = Result<String, Infallible>> {
    stream::unfold(0u64, |i| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok(delta_frame(&format!("t{i} "))), i + 1))
    })
}

/// A workflow endpoint that keeps streaming fragments until the client
/// hangs up.
pub async fn spawn_endless_workflow() -> String {
    let app = Router::new().route(
        "/workflow",
        post(|| async {
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(endless_frames()),
            )
        }),
    );
    format!("{}/workflow", serve(app).await)
}

/// Serve any POST at `<base>/<path>` with a fixed JSON response.
pub async fn spawn_json(
    path: &'static str,
    status: StatusCode,
    body: Value,
) -> (String, Arc<Mutex<Vec<Received>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        status,
        content_type: "application/json",
        body: body.to_string(),
        received: Arc::clone(&received),
    };
    let app = Router::new().route(path, post(canned)).with_state(state);
    let base = serve(app).await;
    (format!("{base}{path}"), received)
}
