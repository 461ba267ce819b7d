use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::feed::FetchOptions;
use crate::vault::path::normalize_path;

pub const DEFAULT_CONFIG_PATH: &str = "watchlist.json";

/// Persisted settings. Unknown keys are ignored and missing ones take defaults,
/// so an empty `{}` file is valid (and syncs nothing until both strings are set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub feed_url: String,
    pub root_path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub max_pages: usize,
    pub max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            feed_url: String::new(),
            root_path: String::new(),
            interval_secs: 3600,
            timeout_secs: 30,
            max_pages: 100,
            max_retries: 2,
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Invalid settings file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            max_retries: self.max_retries,
            ..FetchOptions::default()
        }
    }

    /// Freeze the settings for one run. `None` while the feed URL or root is unset.
    pub fn snapshot(&self) -> Option<RunConfig> {
        let feed_url = self.feed_url.trim();
        let root_path = normalize_path(&self.root_path);
        if feed_url.is_empty() || root_path.is_empty() {
            return None;
        }
        Some(RunConfig {
            feed_url: feed_url.to_string(),
            root_path,
            max_pages: self.max_pages.max(1),
        })
    }
}

/// Immutable view of the settings taken when a run starts; later edits only
/// affect later runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub feed_url: String,
    pub root_path: String,
    pub max_pages: usize,
}
