//! Filesystem blob store.
//!
//! Blobs are plain files in a single upload directory, addressed by file
//! name. The write side lives in the HTTP upload path outside this crate;
//! the core only ever deletes, checks, and lists.

use super::BlobStore;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Blob store over a flat upload directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a blob store rooted at `root`, creating the directory if needed.
    pub async fn new(root: &Path) -> StorageResult<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|_| StorageError::InvalidUploadDir {
                path: root.to_path_buf(),
            })?;

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Resolve a reference to a path inside the root.
    ///
    /// References are bare file names; anything that could escape the
    /// upload directory is rejected.
    fn resolve(&self, reference: &str) -> StorageResult<PathBuf> {
        if reference.is_empty()
            || reference.contains('/')
            || reference.contains('\\')
            || reference == "."
            || reference == ".."
        {
            return Err(StorageError::Blob {
                reference: reference.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "blob reference must be a bare file name",
                ),
            });
        }
        Ok(self.root.join(reference))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn delete(&self, reference: &str) -> StorageResult<()> {
        let path = self.resolve(reference)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|source| StorageError::Blob {
                reference: reference.to_string(),
                source,
            })
    }

    async fn exists(&self, reference: &str) -> StorageResult<bool> {
        let path = self.resolve(reference)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StorageError::Blob {
                reference: reference.to_string(),
                source,
            })
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut entries =
            tokio::fs::read_dir(&self.root)
                .await
                .map_err(|source| StorageError::Blob {
                    reference: self.root.display().to_string(),
                    source,
                })?;

        let mut refs = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| StorageError::Blob {
                    reference: self.root.display().to_string(),
                    source,
                })?;
            let Some(entry) = entry else { break };

            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                if let Ok(name) = entry.file_name().into_string() {
                    refs.push(name);
                }
            }
        }

        Ok(refs)
    }
}
