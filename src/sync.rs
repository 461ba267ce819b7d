use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::Result;
use crate::parser::{Category, FeedEntry};
use crate::vault::note::{render_index, render_note, INDEX_FILE};
use crate::vault::path::{join, sanitize};
use crate::vault::Vault;

/// Where an entry's note lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub category: Category,
    pub folder: String,
    pub file_path: String,
}

impl SyncTarget {
    pub fn for_entry(entry: &FeedEntry, root: &str) -> Self {
        let category = entry.classify();
        let folder = join(root, category.folder());
        let file_path = join(&folder, &format!("{}.md", sanitize(&entry.title)));
        Self {
            category,
            folder,
            file_path,
        }
    }
}

/// Outcome of one [`Synchronizer::sync`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub index_written: bool,
    pub error: Option<String>,
}

impl SyncReport {
    pub fn written(&self) -> usize {
        self.created + self.updated
    }

    pub fn merge(&mut self, other: &SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.index_written |= other.index_written;
        if self.error.is_none() {
            self.error.clone_from(&other.error);
        }
    }
}

enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Writes entries into the vault. Best-effort: storage failures end the call
/// and are reported, never returned.
#[derive(Clone)]
pub struct Synchronizer {
    vault: Arc<dyn Vault>,
}

impl Synchronizer {
    pub fn new(vault: Arc<dyn Vault>) -> Self {
        Self { vault }
    }

    pub async fn sync(&self, entries: &[FeedEntry], root: &str) -> SyncReport {
        let mut report = SyncReport::default();
        if let Err(e) = self.sync_inner(entries, root, &mut report).await {
            error!("Vault sync under {:?} stopped: {}", root, e);
            report.error = Some(e.to_string());
        }
        report
    }

    async fn sync_inner(
        &self,
        entries: &[FeedEntry],
        root: &str,
        report: &mut SyncReport,
    ) -> Result<()> {
        for category in Category::ALL {
            self.ensure_folder(&join(root, category.folder())).await?;
        }

        // Sequential on purpose: colliding titles resolve to the last entry in feed order.
        for entry in entries {
            let target = SyncTarget::for_entry(entry, root);
            match self.write_note(&target.file_path, &render_note(entry)).await? {
                WriteOutcome::Created => report.created += 1,
                WriteOutcome::Updated => report.updated += 1,
                WriteOutcome::Unchanged => report.unchanged += 1,
            }
            debug!(folder = %target.folder, "{} -> {}", entry.title, target.file_path);
        }

        let index_path = join(root, INDEX_FILE);
        self.write_note(&index_path, &render_index(root)).await?;
        report.index_written = true;

        info!(
            "Synced {} entries ({} created, {} updated, {} unchanged)",
            entries.len(),
            report.created,
            report.updated,
            report.unchanged
        );
        Ok(())
    }

    async fn ensure_folder(&self, path: &str) -> Result<()> {
        if self.vault.exists(path).await? {
            return Ok(());
        }
        if let Err(e) = self.vault.create_folder(path).await {
            // Someone else may have created it between the check and the create.
            if !self.vault.exists(path).await? {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn write_note(&self, path: &str, content: &str) -> Result<WriteOutcome> {
        match self.vault.get_file(path).await? {
            Some(file) => {
                if self.vault.read(&file).await? == content {
                    return Ok(WriteOutcome::Unchanged);
                }
                self.vault.modify(&file, content).await?;
                Ok(WriteOutcome::Updated)
            }
            None => {
                self.vault.create(path, content).await?;
                Ok(WriteOutcome::Created)
            }
        }
    }
}
