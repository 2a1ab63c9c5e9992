//! Image encoding: `DynamicImage` → PNG bytes → base64 OCR payload.
//!
//! Pages are written to scratch files as PNG (lossless, so glyph edges stay
//! sharp for recognition) and read back as raw bytes right before the OCR
//! call, where they are base64-wrapped into the JSON request body.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encoding name the OCR endpoint expects for [`encode_png`] output.
pub const PAGE_IMAGE_ENCODING: &str = "png";

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Base64 (standard alphabet, padded) for the OCR request payload.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
