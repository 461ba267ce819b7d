use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Mutex;

use async_trait::async_trait;

use super::path::normalize_path;
use super::{NoteFile, Vault};
use crate::error::{Result, SyncError};

#[derive(Default)]
struct Inner {
    folders: BTreeSet<String>,
    files: BTreeMap<String, String>,
    // Paths whose next create/modify fails, for exercising error containment.
    failing: BTreeSet<String>,
    // Folders that another writer creates just before our create_folder lands.
    racing: BTreeSet<String>,
}

/// In-process vault used by `preview` and the tests.
#[derive(Default)]
pub struct MemoryVault {
    inner: Mutex<Inner>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write to `path` fail with a permission error.
    #[cfg(test)]
    pub fn fail_writes_to(&self, path: &str) {
        self.lock().failing.insert(normalize_path(path));
    }

    /// Make `path` appear concurrently: the next `create_folder` on it creates
    /// the folder and still reports that it already exists.
    #[cfg(test)]
    pub fn race_folder_creation(&self, path: &str) {
        self.lock().racing.insert(normalize_path(path));
    }

    #[cfg(test)]
    pub fn content(&self, path: &str) -> Option<String> {
        self.lock().files.get(&normalize_path(path)).cloned()
    }

    /// All files, sorted by path.
    pub fn files(&self) -> Vec<(String, String)> {
        self.lock()
            .files
            .iter()
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect()
    }

    #[cfg(test)]
    pub fn has_folder(&self, path: &str) -> bool {
        self.lock().folders.contains(&normalize_path(path))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain maps behind; keep using them.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(inner: &Inner, path: &str) -> Result<()> {
        if inner.failing.contains(path) {
            return Err(SyncError::storage(
                path,
                io::Error::new(io::ErrorKind::PermissionDenied, "write refused"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path);
        let inner = self.lock();
        Ok(inner.folders.contains(&path) || inner.files.contains_key(&path))
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        let path = normalize_path(path);
        let mut inner = self.lock();
        Self::check_writable(&inner, &path)?;
        if inner.racing.remove(&path) {
            inner.folders.insert(path.clone());
        }
        if inner.folders.contains(&path) {
            return Err(SyncError::storage(
                path,
                io::Error::new(io::ErrorKind::AlreadyExists, "folder already exists"),
            ));
        }
        inner.folders.insert(path);
        Ok(())
    }

    async fn create(&self, path: &str, content: &str) -> Result<NoteFile> {
        let path = normalize_path(path);
        let mut inner = self.lock();
        Self::check_writable(&inner, &path)?;
        if inner.files.contains_key(&path) {
            return Err(SyncError::storage(
                path,
                io::Error::new(io::ErrorKind::AlreadyExists, "file already exists"),
            ));
        }
        inner.files.insert(path.clone(), content.to_string());
        Ok(NoteFile { path })
    }

    async fn get_file(&self, path: &str) -> Result<Option<NoteFile>> {
        let path = normalize_path(path);
        let inner = self.lock();
        Ok(inner.files.contains_key(&path).then_some(NoteFile { path }))
    }

    async fn read(&self, file: &NoteFile) -> Result<String> {
        self.lock().files.get(&file.path).cloned().ok_or_else(|| {
            SyncError::storage(
                file.path.clone(),
                io::Error::new(io::ErrorKind::NotFound, "no such note"),
            )
        })
    }

    async fn modify(&self, file: &NoteFile, content: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::check_writable(&inner, &file.path)?;
        match inner.files.get_mut(&file.path) {
            Some(existing) => {
                *existing = content.to_string();
                Ok(())
            }
            None => Err(SyncError::storage(
                file.path.clone(),
                io::Error::new(io::ErrorKind::NotFound, "no such note"),
            )),
        }
    }
}
