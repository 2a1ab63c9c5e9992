//! Pipeline stages for PDF-to-text OCR.
//!
//! Each submodule implements one step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ sign ──▶ ocr ──▶ extract
//! (path)    (pdfium)   (png/b64)  (hmac)   (HTTP)  (per file)
//! ```
//!
//! 1. [`input`]: validate the local file and derive display names
//! 2. [`render`]: rasterise pages one by one inside `spawn_blocking`
//!    (pdfium is not async-safe)
//! 3. [`encode`]: PNG-encode pages and base64-wrap them for upload
//! 4. [`sign`]: HMAC-SHA256 request signing for the OCR endpoint
//! 5. [`ocr`]: the OCR call and response decoding
//! 6. [`extract`]: drive one file through render + OCR, isolating page
//!    and file failures

pub mod encode;
pub mod extract;
pub mod input;
pub mod ocr;
pub mod render;
pub mod sign;
