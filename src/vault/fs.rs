use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::path::normalize_path;
use super::{NoteFile, Vault};
use crate::error::{Result, SyncError};

/// A vault backed by a directory on disk.
pub struct FsVault {
    base: PathBuf,
}

impl FsVault {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, path: &str) -> (String, PathBuf) {
        let normalized = normalize_path(path);
        let mut full = self.base.clone();
        for part in normalized.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        (normalized, full)
    }
}

/// Sibling `.{name}.tmp` next to `full`.
fn temp_path(full: &Path) -> PathBuf {
    let file_name = full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    full.with_file_name(format!(".{}.tmp", file_name))
}

#[async_trait]
impl Vault for FsVault {
    async fn exists(&self, path: &str) -> Result<bool> {
        let (normalized, full) = self.resolve(path);
        tokio::fs::try_exists(&full)
            .await
            .map_err(|e| SyncError::storage(normalized, e))
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let (normalized, full) = self.resolve(path);
        match tokio::fs::create_dir(&full).await {
            Ok(()) => Ok(()),
            // Missing parents are created the way a vault would create nested folders.
            Err(e) if e.kind() == io::ErrorKind::NotFound => tokio::fs::create_dir_all(&full)
                .await
                .map_err(|e| SyncError::storage(normalized, e)),
            Err(e) => Err(SyncError::storage(normalized, e)),
        }
    }

    /// Writes a temp file and hard-links it into place: a failed write leaves
    /// no note behind, and an existing note is never replaced.
    async fn create(&self, path: &str, content: &str) -> Result<NoteFile> {
        let (normalized, full) = self.resolve(path);
        let tmp = temp_path(&full);

        if let Err(e) = tokio::fs::write(&tmp, content).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SyncError::storage(normalized, e));
        }
        let linked = tokio::fs::hard_link(&tmp, &full).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        linked.map_err(|e| SyncError::storage(normalized.clone(), e))?;
        Ok(NoteFile { path: normalized })
    }

    async fn get_file(&self, path: &str) -> Result<Option<NoteFile>> {
        let (normalized, full) = self.resolve(path);
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(NoteFile { path: normalized })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::storage(normalized, e)),
        }
    }

    async fn read(&self, file: &NoteFile) -> Result<String> {
        let (normalized, full) = self.resolve(&file.path);
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| SyncError::storage(normalized, e))
    }

    /// Writes a sibling temp file and renames it over the note, so readers
    /// see either the old content or the new one.
    async fn modify(&self, file: &NoteFile, content: &str) -> Result<()> {
        let (normalized, full) = self.resolve(&file.path);
        let tmp = temp_path(&full);

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| SyncError::storage(normalized.clone(), e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &full).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(SyncError::storage(normalized, e));
        }
        Ok(())
    }
}
