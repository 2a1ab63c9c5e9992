//! Input validation for files handed to the pipeline.
//!
//! Upload handling lives outside this crate; by the time a batch starts,
//! every input is a path on local storage. Before pdfium is asked to open a
//! file we check that it exists, is readable and carries the `%PDF` magic
//! bytes, so the resulting [`FileError`] says what is actually wrong instead
//! of a generic pdfium load failure.

use crate::error::FileError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate that `path` is a readable PDF file.
pub fn validate_pdf(path: &Path) -> Result<(), FileError> {
    let mut f = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FileError::NotFound {
            path: path.to_path_buf(),
        },
        _ => FileError::DocumentUnreadable {
            path: path.to_path_buf(),
            detail: e.to_string(),
        },
    })?;

    let mut magic = [0u8; 4];
    if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
        return Err(FileError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    debug!("Validated PDF input: {}", path.display());
    Ok(())
}

/// Display name for a file: its file name, or the full path if it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// File name without directory and extension, used in page headers.
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| display_name(path))
}

/// Group files into consecutive sub-batches whose total size stays within
/// `max_bytes`.
///
/// Upload order is preserved. A file larger than `max_bytes` on its own is
/// skipped and returned in the second vector; files whose size cannot be read
/// are treated as empty so that the pipeline reports them as missing later.
pub fn plan_batches(files: &[PathBuf], max_bytes: u64) -> (Vec<Vec<PathBuf>>, Vec<PathBuf>) {
    let mut batches = Vec::new();
    let mut skipped = Vec::new();
    let mut current: Vec<PathBuf> = Vec::new();
    let mut current_size = 0u64;

    for file in files {
        let size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
        if size > max_bytes {
            skipped.push(file.clone());
            continue;
        }
        if !current.is_empty() && current_size + size > max_bytes {
            batches.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(file.clone());
        current_size += size;
    }

    if !current.is_empty() {
        batches.push(current);
    }

    (batches, skipped)
}
