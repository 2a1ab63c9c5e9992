//! OCR endpoint client.
//!
//! ## Request
//!
//! One signed `POST` per page image. The JSON body carries the image as
//! base64 under a payload key derived from the service id (the last path
//! segment of the endpoint URL):
//!
//! ```json
//! {
//!   "header":    { "app_id": "...", "status": 3 },
//!   "parameter": { "<sid>": { "category": "...",
//!                  "result": { "encoding": "utf8", "compress": "raw", "format": "json" } } },
//!   "payload":   { "<sid>_data_1": { "encoding": "png", "image": "<b64>", "status": 3 } }
//! }
//! ```
//!
//! ## Response
//!
//! A non-zero `header.code` (or top-level `code`) is a service error. On
//! success `payload.result.text` holds base64 of a JSON document shaped
//! pages → lines → words; the recognised text is every word's `content` in
//! document order, with lines that contain no text dropped.

use crate::config::OcrEndpoint;
use crate::error::{OcrError, OcrFlowError};
use crate::pipeline::encode::{self, PAGE_IMAGE_ENCODING};
use crate::pipeline::sign::{self, RequestSigner};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Recognises the text on one page image.
///
/// `Ok(None)` means the call succeeded but nothing was recognised.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<Option<String>, OcrError>;
}

/// HTTP client for the signed OCR endpoint.
#[derive(Debug, Clone)]
pub struct RemoteOcrClient {
    http: reqwest::Client,
    endpoint: OcrEndpoint,
    signer: RequestSigner,
}

impl RemoteOcrClient {
    /// Build a client. Fails fast when the endpoint URL is malformed.
    pub fn new(endpoint: OcrEndpoint) -> Result<Self, OcrFlowError> {
        sign::parse_endpoint(&endpoint.url)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| OcrFlowError::InvalidConfig(format!("OCR HTTP client: {e}")))?;
        let signer = RequestSigner::new(&endpoint.api_key, &endpoint.api_secret);

        Ok(Self {
            http,
            endpoint,
            signer,
        })
    }

    pub fn endpoint(&self) -> &OcrEndpoint {
        &self.endpoint
    }

    /// The JSON request body for one image.
    pub fn request_body(&self, image: &[u8]) -> Value {
        let sid = self.endpoint.service_id();
        json!({
            "header": {
                "app_id": self.endpoint.app_id,
                "status": 3,
            },
            "parameter": {
                sid: {
                    "category": self.endpoint.category,
                    "result": {
                        "encoding": "utf8",
                        "compress": "raw",
                        "format": "json",
                    },
                },
            },
            "payload": {
                format!("{sid}_data_1"): {
                    "encoding": PAGE_IMAGE_ENCODING,
                    "image": encode::to_base64(image),
                    "status": 3,
                },
            },
        })
    }
}

#[async_trait]
impl OcrEngine for RemoteOcrClient {
    async fn recognize(&self, image: &[u8]) -> Result<Option<String>, OcrError> {
        let signed_url = self.signer.sign_url(&self.endpoint.url, "POST")?;
        let body = self.request_body(image);

        let response = self
            .http
            .post(&signed_url)
            .header("content-type", "application/json")
            .header("app_id", &self.endpoint.app_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| OcrError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Http {
                status: status.as_u16(),
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| OcrError::Decode(e.to_string()))?;

        let text = extract_text(&json)?;
        debug!(
            "OCR: {} image bytes → {} chars",
            image.len(),
            text.as_deref().map_or(0, str::len)
        );
        Ok(text)
    }
}

// ── Response decoding ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RecognisedDocument {
    #[serde(default)]
    pages: Vec<RecognisedPage>,
}

#[derive(Debug, Deserialize)]
struct RecognisedPage {
    #[serde(default)]
    lines: Vec<RecognisedLine>,
}

#[derive(Debug, Deserialize)]
struct RecognisedLine {
    #[serde(default)]
    words: Vec<RecognisedWord>,
}

#[derive(Debug, Deserialize)]
struct RecognisedWord {
    #[serde(default)]
    content: String,
}

/// Pull the recognised text out of a full OCR response.
pub fn extract_text(response: &Value) -> Result<Option<String>, OcrError> {
    let code = response
        .pointer("/header/code")
        .or_else(|| response.get("code"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if code != 0 {
        let message = response
            .pointer("/header/message")
            .or_else(|| response.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(OcrError::Service { code, message });
    }

    let Some(encoded) = response
        .pointer("/payload/result/text")
        .and_then(Value::as_str)
    else {
        return Ok(None);
    };

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| OcrError::Decode(format!("result text is not base64: {e}")))?;
    Ok(decode_result(&String::from_utf8_lossy(&decoded)))
}

/// Flatten the decoded pages → lines → words document into plain text.
///
/// Text that is not a recognition document is used as-is with all
/// whitespace removed.
pub fn decode_result(decoded: &str) -> Option<String> {
    let text = match serde_json::from_str::<RecognisedDocument>(decoded) {
        Ok(doc) => doc
            .pages
            .iter()
            .flat_map(|p| &p.lines)
            .filter_map(|line| {
                let joined: String = line.words.iter().map(|w| w.content.as_str()).collect();
                let trimmed = joined.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .collect::<String>(),
        Err(_) => decoded.chars().filter(|c| !c.is_whitespace()).collect(),
    };

    (!text.is_empty()).then_some(text)
}
