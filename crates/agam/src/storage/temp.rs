//! Scratch space for conversions.
//!
//! Every path handed out embeds a fresh UUID, so concurrent jobs never collide
//! without any locking. Anything left behind (crashes, abandoned downloads) is
//! reclaimed by [`TempStorage::reclaim_stale`] once it passes the retention
//! window.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::error::StorageError;
use crate::sanitize::safe_file_name;
use crate::storage::{ensure_directory, remove_path};

#[derive(Debug, Clone)]
pub struct TempStorage {
    root: PathBuf,
}

/// Outcome of a stale sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Entries removed, including ones another sweeper removed first.
    pub removed: usize,
    /// Entries that could not be removed. They are retried on the next sweep.
    pub failed: usize,
}

impl TempStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        ensure_directory(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A unique, not yet existing file path `<root>/<prefix>-<uuid>.<ext>`.
    pub fn allocate_file(&self, prefix: &str, extension: &str) -> PathBuf {
        self.root.join(format!(
            "{}-{}.{}",
            safe_file_name(prefix),
            uuid::Uuid::new_v4(),
            extension
        ))
    }

    /// Like [`allocate_file`](Self::allocate_file) but keeps a caller-chosen
    /// name after the UUID: `<root>/<prefix>-<uuid>-<name>`.
    pub fn allocate_named(&self, prefix: &str, name: &str) -> PathBuf {
        self.root.join(format!(
            "{}-{}-{}",
            safe_file_name(prefix),
            uuid::Uuid::new_v4(),
            safe_file_name(name)
        ))
    }

    /// Creates a fresh scratch directory `<root>/<prefix>-<uuid>`.
    pub fn allocate_dir(&self, prefix: &str) -> Result<PathBuf, StorageError> {
        let dir = self
            .root
            .join(format!("{}-{}", safe_file_name(prefix), uuid::Uuid::new_v4()));
        ensure_directory(&dir)?;
        Ok(dir)
    }

    /// Writes `content` to a freshly allocated file. Creation uses
    /// `create_new`, so an existing file is never overwritten.
    pub fn write_file(
        &self,
        prefix: &str,
        extension: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        let path = self.allocate_file(prefix, extension);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StorageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(content).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
        Ok(path)
    }

    /// Removes top-level entries whose modification time is more than
    /// `older_than` in the past. Younger entries are never touched.
    ///
    /// Safe to run concurrently with other sweeps and with jobs that delete
    /// their own files: an entry that disappears mid-sweep counts as removed.
    pub fn reclaim_stale(&self, older_than: Duration) -> ReclaimReport {
        let _span = tracing::debug_span!("temp.reclaim").entered();
        let now = SystemTime::now();
        let mut report = ReclaimReport::default();

        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let vanished = e
                        .io_error()
                        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                    if !vanished {
                        tracing::warn!(error = %e, "Failed to read temp entry");
                        report.failed += 1;
                    }
                    continue;
                }
            };

            let modified = match entry.metadata().map(|m| m.modified()) {
                Ok(Ok(modified)) => modified,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Temp entry has no modification time");
                    continue;
                }
                // Gone between listing and stat.
                Err(_) => continue,
            };

            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= older_than {
                continue;
            }

            match remove_path(entry.path()) {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to reclaim temp entry");
                    report.failed += 1;
                }
            }
        }

        if report.removed > 0 || report.failed > 0 {
            tracing::info!(
                removed = report.removed,
                failed = report.failed,
                "Reclaimed stale temp entries"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs::File;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn age_file(path: &Path, by: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_allocated_paths_are_unique() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let paths: HashSet<PathBuf> = (0..100).map(|_| temp.allocate_file("out", "pdf")).collect();
        assert_eq!(paths.len(), 100);
        assert!(paths.iter().all(|p| p.starts_with(dir.path())));
    }

    #[test]
    fn test_allocate_file_sanitizes_prefix() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let path = temp.allocate_file("../../escape", "pdf");
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(path.extension().is_some_and(|e| e == "pdf"));
    }

    #[test]
    fn test_allocate_named_keeps_safe_name() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let path = temp.allocate_named("input", "../My Report.docx");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("input-"));
        assert!(name.ends_with("-My_Report.docx"));
        assert_eq!(path.parent().unwrap(), dir.path());
    }

    #[test]
    fn test_allocate_dir_creates_directory() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let scratch = temp.allocate_dir("office").unwrap();
        assert!(scratch.is_dir());
    }

    #[test]
    fn test_write_file() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let path = temp.write_file("upload", "txt", b"hello").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"hello");
    }

    #[test]
    fn test_reclaim_removes_only_old_entries() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let old = temp.write_file("old", "pdf", b"old").unwrap();
        let fresh = temp.write_file("fresh", "pdf", b"fresh").unwrap();
        let scratch = temp.allocate_dir("scratch").unwrap();
        age_file(&old, Duration::from_secs(7200));

        let report = temp.reclaim_stale(Duration::from_secs(3600));

        assert_eq!(report.removed, 1);
        assert_eq!(report.failed, 0);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(scratch.exists());
    }

    #[test]
    fn test_reclaim_keeps_entries_at_threshold() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        let recent = temp.write_file("recent", "pdf", b"x").unwrap();
        age_file(&recent, Duration::from_secs(1800));

        let report = temp.reclaim_stale(Duration::from_secs(3600));

        assert_eq!(report.removed, 0);
        assert!(recent.exists());
    }

    #[test]
    fn test_reclaim_on_empty_root() {
        let dir = TempDir::new().unwrap();
        let temp = TempStorage::new(dir.path()).unwrap();

        assert_eq!(
            temp.reclaim_stale(Duration::from_secs(3600)),
            ReclaimReport::default()
        );
    }

    #[test]
    fn test_concurrent_sweeps_tolerate_each_other() {
        let dir = TempDir::new().unwrap();
        let temp = Arc::new(TempStorage::new(dir.path()).unwrap());

        let mut old = Vec::new();
        for _ in 0..20 {
            let path = temp.write_file("old", "pdf", b"old").unwrap();
            age_file(&path, Duration::from_secs(7200));
            old.push(path);
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let temp = Arc::clone(&temp);
                std::thread::spawn(move || temp.reclaim_stale(Duration::from_secs(3600)))
            })
            .collect();

        for handle in handles {
            let report = handle.join().unwrap();
            assert_eq!(report.failed, 0);
        }
        assert!(old.iter().all(|p| !p.exists()));
    }
}
