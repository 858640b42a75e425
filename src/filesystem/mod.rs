//! Async file helpers backing the file cache store.
//!
//! Thin wrappers over [`tokio::fs`] that give the store the exact semantics it
//! needs: a missing file reads as `None` rather than an error, and removing a
//! missing file reports `false`.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

/// Returns `true` if a regular file exists at `path`.
pub async fn has_file(path: impl AsRef<Path>) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Reads the file at `path` as UTF-8.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Any I/O error other than [`ErrorKind::NotFound`], including invalid UTF-8.
pub async fn read_file(path: impl AsRef<Path>) -> std::io::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Writes `contents` to `path`, replacing any existing file.
pub async fn write_file(path: impl AsRef<Path>, contents: &str) -> std::io::Result<()> {
    fs::write(path, contents).await
}

/// Removes the file at `path`.
///
/// Returns `Ok(false)` when there was nothing to remove.
pub async fn remove(path: impl AsRef<Path>) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
