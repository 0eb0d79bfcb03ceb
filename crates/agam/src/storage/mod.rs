pub mod blob;
pub mod temp;

use std::path::Path;

use crate::error::StorageError;

pub use blob::{BlobRef, BlobStore, FsBlobStore};
pub use temp::{ReclaimReport, TempStorage};

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which covers
/// cross-device moves.
pub(crate) fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

pub(crate) fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Removes a file or directory tree. A path that is already gone is not an
/// error.
pub fn remove_path(path: &Path) -> Result<(), StorageError> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// `remove_path` for cleanup paths where failure is only worth a log line.
pub fn remove_quietly(path: &Path) {
    if let Err(e) = remove_path(path) {
        tracing::warn!(error = %e, "Failed to remove temporary path");
    }
}
