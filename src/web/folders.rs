// Folder enumeration, independent of inference

use std::path::{Path, PathBuf};

use super::error::ApiError;

/// List files in `folder_path` whose names end in `.<extension>`.
///
/// Matching is case-sensitive on the extension suffix. The listing is
/// sorted lexicographically so the order is stable across filesystems,
/// and paths come back absolute. Every call re-reads the directory; no
/// caching between calls.
pub fn list_images(folder_path: &str, extension: &str) -> Result<Vec<PathBuf>, ApiError> {
    let dir = Path::new(folder_path);
    if !dir.exists() {
        return Err(ApiError::not_found(format!(
            "Folder not found: {folder_path}"
        )));
    }
    if !dir.is_dir() {
        return Err(ApiError::not_found(format!(
            "Path is not a directory: {folder_path}"
        )));
    }

    let dir = dir.canonicalize().map_err(|e| {
        ApiError::internal(format!("Failed to resolve directory {folder_path}: {e}"))
    })?;

    let suffix = format!(".{extension}");
    let entries = std::fs::read_dir(&dir).map_err(|e| {
        ApiError::internal(format!("Failed to read directory {folder_path}: {e}"))
    })?;

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(&suffix))
            .unwrap_or(false);
        if matches {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}
