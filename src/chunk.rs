//! Regrouping of page texts into K-page chunks for analysis.

use crate::error::OcrFlowError;
use crate::store::NO_TEXT_MARKER;

/// Separator placed between pages inside a chunk.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Partition `pages` into consecutive windows of at most `k` pages and join
/// each window with a blank line.
///
/// Order is preserved; the last window may be shorter. An empty or
/// whitespace-only page is replaced by the "no text recognized" marker so a
/// processed-but-empty page stays visible in the chunk.
pub fn chunk_pages<S: AsRef<str>>(pages: &[S], k: usize) -> Result<Vec<String>, OcrFlowError> {
    if k == 0 {
        return Err(OcrFlowError::InvalidChunkSize { k });
    }

    Ok(pages
        .chunks(k)
        .map(|window| {
            window
                .iter()
                .map(|p| {
                    let text = p.as_ref();
                    if text.trim().is_empty() {
                        NO_TEXT_MARKER
                    } else {
                        text
                    }
                })
                .collect::<Vec<_>>()
                .join(PAGE_SEPARATOR)
        })
        .collect())
}
