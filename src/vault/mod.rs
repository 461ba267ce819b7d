pub mod fs;
pub mod memory;
pub mod note;
pub mod path;

use async_trait::async_trait;

use crate::error::Result;
pub use fs::FsVault;
pub use memory::MemoryVault;

/// Handle to an existing note, as returned by [`Vault::get_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFile {
    pub path: String,
}

/// The document store the synchronizer writes into. Paths are `/`-joined and
/// relative to the vault root; implementations normalize them before use.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn create_folder(&self, path: &str) -> Result<()>;

    /// Create a new note. Fails if something already lives at `path`.
    async fn create(&self, path: &str, content: &str) -> Result<NoteFile>;

    async fn get_file(&self, path: &str) -> Result<Option<NoteFile>>;

    async fn read(&self, file: &NoteFile) -> Result<String>;

    /// Replace the full content of an existing note.
    async fn modify(&self, file: &NoteFile, content: &str) -> Result<()>;
}
