mod config;
mod error;
mod feed;
mod parser;
mod run;
mod scheduler;
mod sync;
mod vault;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use config::Settings;
use feed::{HttpSource, PageSource};
use parser::FeedEntry;
use run::SyncService;
use scheduler::TriggerOutcome;
use sync::SyncTarget;
use vault::{FsVault, MemoryVault};

#[derive(Parser)]
#[command(name = "watchlist_sync", about = "Sync a watchlist RSS feed into a notes vault")]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Vault directory on disk
    #[arg(long, global = true, env = "WATCHLIST_VAULT", default_value = ".")]
    vault: PathBuf,

    /// Feed URL (overrides the settings file)
    #[arg(long, global = true, env = "WATCHLIST_FEED_URL")]
    feed_url: Option<String>,

    /// Folder inside the vault that receives the notes (overrides the settings file)
    #[arg(long, global = true, env = "WATCHLIST_ROOT")]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a settings file with defaults
    Init,
    /// Sync the feed into the vault once
    Sync {
        /// Start from this page instead of the configured feed URL
        #[arg(long)]
        from: Option<String>,
    },
    /// Keep syncing on a timer; press Enter to sync now
    Watch {
        /// Also sync right away instead of waiting for the first tick
        #[arg(long)]
        now: bool,
    },
    /// Fetch every page and show where each entry would be written
    Preview {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Parse a feed page saved on disk
    Parse {
        file: PathBuf,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = Settings::load(&self.config)?;
        if let Some(url) = &self.feed_url {
            settings.feed_url = url.clone();
        }
        if let Some(root) = &self.root {
            settings.root_path = root.clone();
        }
        Ok(settings)
    }

    fn service(&self, settings: &Settings) -> anyhow::Result<SyncService> {
        let source: Arc<dyn PageSource> = Arc::new(
            HttpSource::new(settings.fetch_options()).context("Failed to build HTTP client")?,
        );
        let vault = Arc::new(FsVault::new(&self.vault));
        Ok(SyncService::new(source, vault))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Init => {
            if cli.config.exists() {
                println!("{} already exists; leaving it alone.", cli.config.display());
                return Ok(());
            }
            cli.settings()?.save(&cli.config)?;
            println!("Wrote {}. Set feedUrl and rootPath to start syncing.", cli.config.display());
            Ok(())
        }
        Commands::Sync { from } => {
            let settings = cli.settings()?;
            let Some(config) = settings.snapshot() else {
                println!("Nothing to do: set feedUrl and rootPath in {}.", cli.config.display());
                return Ok(());
            };
            let service = cli.service(&settings)?;
            let start = from.clone().unwrap_or_else(|| config.feed_url.clone());

            let pb = spinner()?;
            let summary = service
                .run_from(&config, &start, |s| {
                    pb.set_message(format!("{} pages, {} entries", s.pages, s.entries));
                })
                .await;
            pb.finish_and_clear();

            println!(
                "Synced {} entries from {} pages into {}/ ({} created, {} updated, {} unchanged).",
                summary.entries,
                summary.pages,
                config.root_path,
                summary.report.created,
                summary.report.updated,
                summary.report.unchanged,
            );
            if let Some(e) = summary.aborted.as_ref().or(summary.report.error.as_ref()) {
                println!("Stopped early: {}", e);
            }
            Ok(())
        }
        Commands::Watch { now } => watch(&cli, *now).await,
        Commands::Preview { json, limit } => {
            let settings = cli.settings()?;
            let Some(config) = settings.snapshot() else {
                println!("Nothing to preview: set feedUrl and rootPath in {}.", cli.config.display());
                return Ok(());
            };
            let source = HttpSource::new(settings.fetch_options())?;
            let entries = feed::fetch_all(&source, &config.feed_url, config.max_pages).await?;
            print_entries(&entries, &config.root_path, *json, *limit)?;
            if !*json {
                // Dry run against an in-memory vault to count title collisions.
                let scratch = Arc::new(MemoryVault::new());
                sync::Synchronizer::new(scratch.clone())
                    .sync(&entries, &config.root_path)
                    .await;
                let notes = scratch.files().len().saturating_sub(1);
                println!(
                    "{} notes would be written under {}/ ({} titles collide)",
                    notes,
                    config.root_path,
                    entries.len().saturating_sub(notes)
                );
            }
            Ok(())
        }
        Commands::Parse { file, json } => {
            let xml = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let page = parser::parse_page(&xml)?;
            let root = cli.settings()?.root_path;
            print_entries(&page.entries, &root, *json, usize::MAX)?;
            if let Some(next) = &page.next_page_url {
                println!("Next page: {}", next);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn watch(cli: &Cli, now: bool) -> anyhow::Result<()> {
    let settings = cli.settings()?;
    let interval = settings.interval();
    let service = Arc::new(cli.service(&settings)?);
    let handle = scheduler::spawn_scheduler(service, settings);

    println!(
        "Syncing every {}. Press Enter to sync now, Ctrl-C to stop.",
        format_duration(interval)
    );
    if now {
        handle.trigger().await;
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    // Pick up edits to the settings file before a manual run.
                    match cli.settings() {
                        Ok(s) => handle.update_settings(s),
                        Err(e) => tracing::warn!("Keeping previous settings: {:#}", e),
                    }
                    match handle.trigger().await {
                        TriggerOutcome::Started => println!("Sync started."),
                        TriggerOutcome::Queued => println!("Sync running; another run queued."),
                        TriggerOutcome::Collapsed => println!("Sync running; a run is already queued."),
                        TriggerOutcome::Stopped => break,
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin unreadable, manual trigger disabled: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    println!("Shutting down...");
    handle.shutdown().await;
    let status = handle.status().borrow().clone();
    println!("{} sync runs completed.", status.runs_completed);
    if let Some(last) = status.last_run.filter(|r| !r.is_complete()) {
        if let Some(e) = last.aborted.or(last.report.error) {
            println!("Last run stopped early: {}", e);
        }
    }
    Ok(())
}

fn spinner() -> anyhow::Result<indicatif::ProgressBar> {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    Ok(pb)
}

fn print_entries(entries: &[FeedEntry], root: &str, json: bool, limit: usize) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    println!(
        "{:>3} | {:<32} | {:<6} | {:>4} | {:>6} | {:<40}",
        "#", "Title", "Kind", "Year", "Rating", "Note"
    );
    println!("{}", "-".repeat(106));

    for (i, e) in entries.iter().take(limit).enumerate() {
        let target = SyncTarget::for_entry(e, root);
        println!(
            "{:>3} | {:<32} | {:<6} | {:>4} | {:>6} | {:<40}",
            i + 1,
            truncate(&e.title, 32),
            target.category,
            e.year.to_string(),
            truncate(&e.rating, 6),
            truncate(&target.file_path, 40),
        );
    }

    if entries.len() > limit {
        println!("... {} more", entries.len() - limit);
    }
    println!("\n{} entries", entries.len());
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_width() {
        assert_eq!(truncate("Arrival", 10), "Arrival");
        assert_eq!(truncate("The Lord of the Rings", 10), "The Lor...");
        assert_eq!(truncate("千と千尋の神隠し", 5), "千と...");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h 0m 0s");
    }

    #[test]
    fn cli_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchlist.json");
        Settings {
            feed_url: "https://file.example/rss".into(),
            root_path: "FromFile".into(),
            ..Default::default()
        }
        .save(&path)
        .unwrap();

        let cli = Cli::try_parse_from([
            "watchlist_sync",
            "--config",
            path.to_str().unwrap(),
            "--root",
            "FromFlag",
            "sync",
        ])
        .unwrap();
        let settings = cli.settings().unwrap();
        assert_eq!(settings.feed_url, "https://file.example/rss");
        assert_eq!(settings.root_path, "FromFlag");
    }
}
