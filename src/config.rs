//! Configuration types for the OCR-and-analysis pipeline.
//!
//! Pipeline behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The two remote services each get their own
//! plain struct ([`OcrEndpoint`], [`WorkflowEndpoint`]) because they carry
//! credentials and are usually filled from the environment by the CLI.
//!
//! Neither endpoint struct prints its secrets in `Debug` output.

use crate::error::OcrFlowError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default OCR endpoint (general-purpose printed/handwritten text recognition).
pub const DEFAULT_OCR_URL: &str = "https://api.xf-yun.com/v1/private/sf8e6aca1";

/// Default analysis workflow endpoint.
pub const DEFAULT_WORKFLOW_URL: &str = "https://xingchen-api.xf-yun.com/workflow/v1/chat/completions";

/// Configuration for a pipeline instance.
///
/// # Example
/// ```rust
/// use ocrflow::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .render_scale(2.0)
///     .k_pages(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.k_pages, 8);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Upscale factor applied when rasterising pages for OCR. Range: 0.5–4.0. Default: 2.0.
    ///
    /// Larger images improve OCR recall at the cost of upload size and
    /// latency per call.
    pub render_scale: f32,

    /// Pages per analysis chunk. Default: 5.
    pub k_pages: usize,

    /// Directory for rendered page images. `None` uses the system temp dir.
    pub scratch_dir: Option<PathBuf>,

    /// Delete each source PDF once its OCR output has been captured. Default: true.
    pub delete_sources: bool,

    /// How long finished tasks (and their results) are kept. Default: 24 h.
    pub retention: Duration,

    /// Directory containing the pdfium shared library. `None` binds to the
    /// system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Where analysis exports are written. `None` disables export.
    pub export_dir: Option<PathBuf>,

    /// Optional rewrite applied to streamed fragments before they reach the caller.
    pub notice_rewrite: Option<NoticeRewrite>,

    /// Optional progress observer for batches.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            k_pages: 5,
            scratch_dir: None,
            delete_sources: true,
            retention: Duration::from_secs(24 * 60 * 60),
            pdfium_lib_path: None,
            export_dir: None,
            notice_rewrite: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("render_scale", &self.render_scale)
            .field("k_pages", &self.k_pages)
            .field("scratch_dir", &self.scratch_dir)
            .field("delete_sources", &self.delete_sources)
            .field("retention", &self.retention)
            .field("pdfium_lib_path", &self.pdfium_lib_path)
            .field("export_dir", &self.export_dir)
            .field("notice_rewrite", &self.notice_rewrite)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The scratch directory, falling back to the system temp dir.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn k_pages(mut self, k: usize) -> Self {
        self.config.k_pages = k;
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    pub fn delete_sources(mut self, v: bool) -> Self {
        self.config.delete_sources = v;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.export_dir = Some(dir.into());
        self
    }

    pub fn notice_rewrite(mut self, rewrite: NoticeRewrite) -> Self {
        self.config.notice_rewrite = Some(rewrite);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrFlowError> {
        let c = &self.config;
        if c.k_pages == 0 {
            return Err(OcrFlowError::InvalidConfig(
                "Pages per chunk must be >= 1".into(),
            ));
        }
        if !c.render_scale.is_finite() || c.render_scale <= 0.0 {
            return Err(OcrFlowError::InvalidConfig(format!(
                "Render scale must be positive, got {}",
                c.render_scale
            )));
        }
        Ok(self.config)
    }
}

/// Rewrites a fragment that starts with `prefix` before it is forwarded.
///
/// Only the forwarded copy changes; the accumulated analysis text keeps the
/// fragment as the endpoint sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeRewrite {
    pub prefix: String,
    pub replacement: String,
}

impl NoticeRewrite {
    pub fn new(prefix: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            replacement: replacement.into(),
        }
    }

    /// Apply the rewrite to one fragment.
    pub fn apply(&self, fragment: &str) -> String {
        match fragment.strip_prefix(self.prefix.as_str()) {
            Some(rest) if !self.prefix.is_empty() => format!("{}{}", self.replacement, rest),
            _ => fragment.to_string(),
        }
    }
}

// ── Remote endpoints ─────────────────────────────────────────────────────

/// Credentials and routing for the OCR endpoint.
#[derive(Clone)]
pub struct OcrEndpoint {
    /// Full endpoint URL; the last path segment is the service id.
    pub url: String,
    pub app_id: String,
    pub api_key: String,
    pub api_secret: String,
    /// Recognition category sent with each request.
    pub category: String,
    /// Per-request timeout in seconds. Default: 60.
    pub timeout_secs: u64,
}

impl OcrEndpoint {
    pub fn new(
        app_id: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            url: DEFAULT_OCR_URL.to_string(),
            app_id: app_id.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            category: "ch_en_public_cloud".to_string(),
            timeout_secs: 60,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Service id used as the request parameter/payload key.
    pub fn service_id(&self) -> &str {
        self.url
            .split('?')
            .next()
            .unwrap_or_default()
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Debug for OcrEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OcrEndpoint")
            .field("url", &self.url)
            .field("app_id", &self.app_id)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("category", &self.category)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Credentials and routing metadata for the analysis workflow endpoint.
#[derive(Clone)]
pub struct WorkflowEndpoint {
    pub url: String,
    /// Sent as `Authorization: Bearer <token>`.
    pub bearer_token: String,
    pub flow_id: String,
    pub uid: String,
    pub bot_id: String,
    pub caller: String,
    /// Instruction sent alongside the chunk list.
    pub user_input: String,
    /// Request a server-sent-event response. Default: true.
    pub stream: bool,
    /// Connect timeout in seconds. Default: 30.
    pub connect_timeout_secs: u64,
}

impl WorkflowEndpoint {
    pub fn new(bearer_token: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_WORKFLOW_URL.to_string(),
            bearer_token: bearer_token.into(),
            flow_id: flow_id.into(),
            uid: "ocrflow".to_string(),
            bot_id: "ocrflow".to_string(),
            caller: "workflow".to_string(),
            user_input: "Please analyse the following PDF content".to_string(),
            stream: true,
            connect_timeout_secs: 30,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl fmt::Debug for WorkflowEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEndpoint")
            .field("url", &self.url)
            .field("bearer_token", &"<redacted>")
            .field("flow_id", &self.flow_id)
            .field("uid", &self.uid)
            .field("bot_id", &self.bot_id)
            .field("caller", &self.caller)
            .field("stream", &self.stream)
            .finish()
    }
}
