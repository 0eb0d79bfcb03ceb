//! Durable storage for job inputs and results.
//!
//! Jobs never hold filesystem paths. They hold [`BlobRef`]s, opaque handles
//! that only a [`BlobStore`] can turn back into something readable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::sanitize::safe_file_name;
use crate::storage::{ensure_directory, move_file, remove_path};

/// Opaque handle to a stored blob, shaped `<namespace>/<uuid>-<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobRef(String);

impl BlobRef {
    fn generate(namespace: &str, name: &str) -> Self {
        Self(format!(
            "{}/{}-{}",
            safe_file_name(namespace),
            uuid::Uuid::new_v4(),
            safe_file_name(name)
        ))
    }

    /// Validates a reference read back from storage. Anything that could
    /// escape the store root is rejected.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidBlobRef(raw.to_string());

        if raw.contains('\\') || raw.starts_with('/') {
            return Err(invalid());
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() != 2 {
            return Err(invalid());
        }
        if segments
            .iter()
            .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains(':'))
        {
            return Err(invalid());
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BlobRef {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobRef> for String {
    fn from(value: BlobRef) -> Self {
        value.0
    }
}

pub trait BlobStore: Send + Sync {
    /// Stores `content` under `namespace`, keeping `name` as a readable suffix.
    fn put_bytes(&self, namespace: &str, name: &str, content: &[u8])
        -> Result<BlobRef, StorageError>;

    /// Moves an existing file into the store.
    fn put_file(&self, namespace: &str, name: &str, source: &Path)
        -> Result<BlobRef, StorageError>;

    /// Local path of a stored blob. Fails with `BlobNotFound` if it is gone.
    fn path(&self, blob: &BlobRef) -> Result<PathBuf, StorageError>;

    /// Deletes a blob. Deleting a missing blob succeeds.
    fn delete(&self, blob: &BlobRef) -> Result<(), StorageError>;

    fn exists(&self, blob: &BlobRef) -> bool;
}

/// Blob store backed by a local directory tree.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        ensure_directory(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn location(&self, blob: &BlobRef) -> PathBuf {
        self.root.join(blob.as_str())
    }

    fn prepare(&self, namespace: &str, name: &str) -> Result<(BlobRef, PathBuf), StorageError> {
        let blob = BlobRef::generate(namespace, name);
        let path = self.location(&blob);
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }
        Ok((blob, path))
    }
}

impl BlobStore for FsBlobStore {
    fn put_bytes(
        &self,
        namespace: &str,
        name: &str,
        content: &[u8],
    ) -> Result<BlobRef, StorageError> {
        let (blob, path) = self.prepare(namespace, name)?;
        std::fs::write(&path, content).map_err(|e| StorageError::WriteFile { path, source: e })?;
        Ok(blob)
    }

    fn put_file(
        &self,
        namespace: &str,
        name: &str,
        source: &Path,
    ) -> Result<BlobRef, StorageError> {
        let (blob, path) = self.prepare(namespace, name)?;
        move_file(source, &path)?;
        Ok(blob)
    }

    fn path(&self, blob: &BlobRef) -> Result<PathBuf, StorageError> {
        let path = self.location(blob);
        if path.is_file() {
            Ok(path)
        } else {
            Err(StorageError::BlobNotFound(blob.to_string()))
        }
    }

    fn delete(&self, blob: &BlobRef) -> Result<(), StorageError> {
        remove_path(&self.location(blob))
    }

    fn exists(&self, blob: &BlobRef) -> bool {
        self.location(blob).is_file()
    }
}
