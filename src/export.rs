//! Export of analysis output to a file that a download route can serve.

use crate::error::OcrFlowError;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Anything outside this set is replaced in generated filenames.
static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").unwrap());

/// Reference to an exported analysis file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedArtifact {
    pub filename: String,
    /// Retrieval path, `/download/<filename>`.
    pub download_url: String,
}

/// Replace path separators and other unsafe characters with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = RE_UNSAFE.replace_all(name, "_");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "analysis".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Write `text` to `<dir>/analysis_<task>_<timestamp>.md`.
///
/// Uses atomic write (temp file + rename) so a reader never sees a partial file.
pub async fn write_analysis(
    dir: &Path,
    task_id: &str,
    text: &str,
) -> Result<ExportedArtifact, OcrFlowError> {
    let filename = sanitize_filename(&format!(
        "analysis_{}_{}.md",
        task_id,
        Utc::now().format("%Y%m%d_%H%M%S")
    ));
    let path = dir.join(&filename);
    let write_err = |e| OcrFlowError::WriteFailed {
        path: path.clone(),
        source: e,
    };

    tokio::fs::create_dir_all(dir).await.map_err(write_err)?;

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, text).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, &path).await.map_err(write_err)?;

    info!("Wrote analysis for task {} → {}", task_id, path.display());

    Ok(ExportedArtifact {
        download_url: format!("/download/{filename}"),
        filename,
    })
}
