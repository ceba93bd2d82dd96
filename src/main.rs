use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};

use podvault::{
    Config, DownloadKind, NoopReporter, Reporter, ReqwestClient, SharedReporter, SyncEvent,
    sync_feed,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "[-] ");
static RESTORE: Emoji<'_, '_> = Emoji("♻️  ", "[^] ");
static ARCHIVE: Emoji<'_, '_> = Emoji("📦 ", "[=] ");

/// Mirror podcast feeds with versioned episode storage
#[derive(Parser, Debug)]
#[command(name = "podvault")]
#[command(about = "Mirror podcast feeds with versioned episode storage")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short = 'C', long, default_value = "podvault.toml")]
    config: PathBuf,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

/// Terminal reporter: one indicatif bar for the active download (downloads
/// run sequentially), plain colored lines for everything else
struct ConsoleReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn start_bar(&self, content_length: Option<u64>, message: String) {
        let style = ProgressStyle::default_bar()
            .template("  [{bar:30.cyan/blue}] {bytes}/{total_bytes} {wide_msg}")
            .unwrap()
            .progress_chars("█▓░");

        let bar = ProgressBar::new(content_length.unwrap_or(0));
        bar.set_style(style);
        bar.set_message(message);

        *self.bar.lock().unwrap() = Some(bar);
    }

    fn finish_bar(&self) {
        if let Some(bar) = self.bar.lock().unwrap().take() {
            bar.finish_and_clear();
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, event: SyncEvent) {
        match event {
            SyncEvent::FetchingFeed { url } => {
                println!("{SEARCH}Fetching feed: {}", url.cyan());
            }

            SyncEvent::FeedParsed {
                podcast_title,
                total_entries,
            } => {
                println!(
                    "{HEADPHONES}{} • {} entries",
                    podcast_title.bold().green(),
                    total_entries.to_string().cyan()
                );
            }

            SyncEvent::PartialFilesCleaned { count } => {
                println!(
                    "  {}",
                    format!("Removed {count} leftover partial file(s)").dimmed()
                );
            }

            SyncEvent::DownloadStarting {
                episode_title,
                kind,
                content_length,
            } => {
                let label = match kind {
                    DownloadKind::New => "downloading",
                    DownloadKind::Redownload => "re-downloading",
                    DownloadKind::Update => "updating",
                    DownloadKind::Verify => "verifying",
                };
                self.start_bar(
                    content_length,
                    format!("{label} {}", truncate_title(&episode_title, 40)),
                );
            }

            SyncEvent::DownloadProgress {
                bytes_downloaded,
                total_bytes,
            } => {
                if let Some(bar) = self.bar.lock().unwrap().as_ref() {
                    if let Some(total) = total_bytes {
                        bar.set_length(total);
                    }
                    bar.set_position(bytes_downloaded);
                }
            }

            SyncEvent::DownloadCompleted { episode_title, .. } => {
                self.finish_bar();
                println!("{SUCCESS}{}", truncate_title(&episode_title, 60).green());
            }

            SyncEvent::DownloadFailed {
                episode_title,
                error,
                ..
            } => {
                self.finish_bar();
                println!(
                    "{FAILURE}{} - {}",
                    truncate_title(&episode_title, 40).red(),
                    error.red()
                );
            }

            SyncEvent::Unchanged { episode_title } => {
                println!(
                    "  {}",
                    format!("unchanged: {}", truncate_title(&episode_title, 60)).dimmed()
                );
            }

            SyncEvent::ContentIdentical { episode_title } => {
                println!(
                    "  {}",
                    format!(
                        "verified identical: {}",
                        truncate_title(&episode_title, 50)
                    )
                    .dimmed()
                );
            }

            SyncEvent::SkippedOutOfRange { episode_title } => {
                println!(
                    "  {}",
                    format!("too old, skipped: {}", truncate_title(&episode_title, 50)).dimmed()
                );
            }

            SyncEvent::SkippedLimit { entry_index, limit } => {
                println!(
                    "  {}",
                    format!("download limit of {limit} reached at entry {entry_index}").yellow()
                );
            }

            SyncEvent::TitleChanged { old, new } => {
                println!(
                    "  {} {} {} {}",
                    "title changed:".yellow(),
                    truncate_title(&old, 30).dimmed(),
                    "→".yellow(),
                    truncate_title(&new, 30)
                );
            }

            SyncEvent::MetadataChanged {
                episode_title,
                fields,
            } => {
                println!(
                    "  {} {} ({})",
                    "metadata changed:".yellow(),
                    truncate_title(&episode_title, 40),
                    fields.join(", ").dimmed()
                );
            }

            SyncEvent::VersionArchived { archived_file } => {
                println!("{ARCHIVE}archived {}", archived_file.dimmed());
            }

            SyncEvent::EpisodeDeleted { title } => {
                println!(
                    "{TRASH}{} {}",
                    "quarantined:".yellow(),
                    truncate_title(&title, 50)
                );
            }

            SyncEvent::EpisodeRestored { title } => {
                println!(
                    "{RESTORE}{} {}",
                    "restored:".green(),
                    truncate_title(&title, 50)
                );
            }

            SyncEvent::FeedSaved { path } => {
                println!("{FOLDER}Feed written: {}", path.display().to_string().cyan());
            }

            SyncEvent::SyncCompleted {
                downloads_count,
                skipped_old_count,
            } => {
                println!(
                    "{PARTY}{} {} downloaded, {} skipped as too old",
                    "Sync complete:".bold().green(),
                    downloads_count.to_string().green().bold(),
                    skipped_old_count.to_string().yellow()
                );
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let truncated: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podvault".bold().magenta(),
            "- Podcast Feed Mirror".dimmed()
        );
    }

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let client = ReqwestClient::new();

    let reporter: SharedReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(ConsoleReporter::new())
    };

    let mut failed_feeds = Vec::new();

    for podcast in &config.podcasts {
        if !args.quiet {
            println!("\n{}", podcast.name.bold().magenta());
        }

        let storage_dir = config.storage_dir_for(podcast);
        let options = config.options_for(podcast);

        // One broken feed must not stop the others
        match sync_feed(
            &client,
            &podcast.feed_url,
            &storage_dir,
            &options,
            reporter.as_ref(),
        )
        .await
        {
            Ok(_) => {}
            Err(e) => {
                eprintln!("{FAILURE}{} - {}", podcast.name.red().bold(), e);
                failed_feeds.push(podcast.name.clone());
            }
        }
    }

    if !args.quiet {
        println!(
            "\n{FOLDER}Storage: {}\n",
            config.storage_dir.display().to_string().cyan()
        );
    }

    if !failed_feeds.is_empty() && failed_feeds.len() == config.podcasts.len() {
        std::process::exit(1);
    }

    Ok(())
}
