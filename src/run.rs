use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{RunConfig, Settings};
use crate::feed::{PageSource, Paginator};
use crate::sync::{SyncReport, Synchronizer};
use crate::vault::Vault;

/// What one sync run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub pages: usize,
    pub entries: usize,
    pub report: SyncReport,
    /// Set when a fetch or parse error ended the run early.
    pub aborted: Option<String>,
    pub skipped: bool,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        !self.skipped && self.aborted.is_none() && self.report.error.is_none()
    }
}

/// Fetches the feed page by page and flushes each page into the vault before
/// asking for the next one.
pub struct SyncService {
    source: Arc<dyn PageSource>,
    synchronizer: Synchronizer,
}

impl SyncService {
    pub fn new(source: Arc<dyn PageSource>, vault: Arc<dyn Vault>) -> Self {
        Self {
            source,
            synchronizer: Synchronizer::new(vault),
        }
    }

    /// Run against a snapshot of `settings`; a no-op until feed URL and root are set.
    pub async fn run_with_settings(&self, settings: &Settings) -> RunSummary {
        match settings.snapshot() {
            Some(config) => self.run(&config).await,
            None => {
                warn!("Feed URL or root folder not configured; skipping sync");
                RunSummary {
                    skipped: true,
                    ..Default::default()
                }
            }
        }
    }

    pub async fn run(&self, config: &RunConfig) -> RunSummary {
        self.run_from(config, &config.feed_url, |_| {}).await
    }

    /// Sync starting at `start_url`. `on_page` sees the running totals after each flushed page.
    pub async fn run_from<F>(&self, config: &RunConfig, start_url: &str, mut on_page: F) -> RunSummary
    where
        F: FnMut(&RunSummary) + Send,
    {
        info!("Sync started from {}", start_url);
        let mut summary = RunSummary::default();
        let mut pages = Paginator::new(self.source.as_ref(), start_url, config.max_pages);

        loop {
            match pages.next_page().await {
                Ok(Some(page)) => {
                    let report = self.synchronizer.sync(&page.entries, &config.root_path).await;
                    summary.pages += 1;
                    summary.entries += page.entries.len();
                    summary.report.merge(&report);
                    on_page(&summary);
                }
                Ok(None) => break,
                Err(e) if e.is_network() => {
                    error!("Feed unreachable after {} page(s): {}", summary.pages, e);
                    summary.aborted = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    error!("Sync aborted after {} page(s): {}", summary.pages, e);
                    summary.aborted = Some(e.to_string());
                    break;
                }
            }
        }

        info!(
            "Sync finished: {} pages, {} entries, {} notes written",
            summary.pages,
            summary.entries,
            summary.report.written()
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::{feed_page, ScriptedSource};
    use crate::vault::MemoryVault;

    fn config() -> RunConfig {
        RunConfig {
            feed_url: "https://e.com/p1".into(),
            root_path: "Media".into(),
            max_pages: 100,
        }
    }

    #[tokio::test]
    async fn syncs_every_page() {
        let source = Arc::new(
            ScriptedSource::new()
                .page("https://e.com/p1", feed_page(&["A", "B"], Some("https://e.com/p2")))
                .page("https://e.com/p2", feed_page(&["C"], None)),
        );
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source.clone(), vault.clone());

        let summary = service.run(&config()).await;
        assert!(summary.is_complete());
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.entries, 3);
        assert_eq!(summary.report.created, 3);
        for title in ["A", "B", "C"] {
            assert!(vault.content(&format!("Media/movies/{}.md", title)).is_some());
        }
        assert!(vault.content("Media/watch.md").is_some());
    }

    #[tokio::test]
    async fn page_two_failure_keeps_page_one() {
        // p2 is not served, so its fetch fails.
        let source = Arc::new(
            ScriptedSource::new()
                .page("https://e.com/p1", feed_page(&["Kept"], Some("https://e.com/p2"))),
        );
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source.clone(), vault.clone());

        let summary = service.run(&config()).await;
        assert_eq!(summary.pages, 1);
        assert!(summary.aborted.is_some());
        assert!(!summary.is_complete());
        assert!(vault.content("Media/movies/Kept.md").is_some());
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn malformed_page_two_keeps_page_one() {
        let source = Arc::new(
            ScriptedSource::new()
                .page("https://e.com/p1", feed_page(&["Kept"], Some("https://e.com/p2")))
                .page("https://e.com/p2", "<rss><channel><item>".to_string()),
        );
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source.clone(), vault.clone());

        let summary = service.run(&config()).await;
        assert_eq!(summary.pages, 1);
        assert_eq!(summary.report.created, 1);
        let reason = summary.aborted.expect("run should stop at the bad page");
        assert!(reason.contains("unclosed"), "{}", reason);
        assert!(vault.content("Media/movies/Kept.md").is_some());
        assert!(vault.content("Media/watch.md").is_some());
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn each_page_is_flushed_before_the_next_fetch() {
        let source = Arc::new(
            ScriptedSource::new()
                .page("https://e.com/p1", feed_page(&["A"], Some("https://e.com/p2")))
                .page("https://e.com/p2", feed_page(&["B"], None)),
        );
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source.clone(), vault.clone());

        let mut seen = Vec::new();
        service
            .run_from(&config(), "https://e.com/p1", |s| {
                seen.push((s.pages, source.calls().len(), s.report.created));
            })
            .await;
        // After page 1 was written only one fetch had happened.
        assert_eq!(seen, [(1, 1, 1), (2, 2, 2)]);
    }

    #[tokio::test]
    async fn explicit_start_url() {
        let source = Arc::new(
            ScriptedSource::new().page("https://e.com/p9", feed_page(&["Late"], None)),
        );
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source.clone(), vault.clone());
        let summary = service.run_from(&config(), "https://e.com/p9", |_| {}).await;
        assert!(summary.is_complete());
        assert_eq!(source.calls(), ["https://e.com/p9"]);
    }

    #[tokio::test]
    async fn unconfigured_settings_skip() {
        let source = Arc::new(ScriptedSource::new());
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source.clone(), vault.clone());

        let summary = service.run_with_settings(&Settings::default()).await;
        assert!(summary.skipped);
        assert!(source.calls().is_empty());
        assert!(vault.files().is_empty());
    }

    #[tokio::test]
    async fn repeated_runs_do_not_duplicate() {
        let source = Arc::new(
            ScriptedSource::new().page("https://e.com/p1", feed_page(&["A", "B"], None)),
        );
        let vault = Arc::new(MemoryVault::new());
        let service = SyncService::new(source, vault.clone());

        service.run(&config()).await;
        let first = vault.files();
        let second = service.run(&config()).await;
        assert_eq!(second.report.unchanged, 2);
        assert_eq!(vault.files(), first);
    }
}
