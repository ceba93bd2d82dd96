use std::path::PathBuf;
use std::sync::Arc;

/// Why the engine is fetching an enclosure body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    /// First download of a new episode
    New,
    /// Known episode whose local file went missing
    Redownload,
    /// Remote size differs from the local file
    Update,
    /// Entity tag changed at unchanged size; fetched to compare hashes
    Verify,
}

/// Events emitted during a feed's sync run for logging and progress display
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Feed is being fetched from URL
    FetchingFeed { url: String },

    /// Feed has been parsed successfully
    FeedParsed {
        podcast_title: String,
        total_entries: usize,
    },

    /// Leftover temporary files from an interrupted run were removed
    PartialFilesCleaned { count: usize },

    /// An enclosure download is starting
    DownloadStarting {
        episode_title: String,
        kind: DownloadKind,
        content_length: Option<u64>,
    },

    /// Download progress update
    DownloadProgress {
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// A download completed successfully
    DownloadCompleted {
        episode_title: String,
        bytes_downloaded: u64,
    },

    /// A download attempt failed; the entry is skipped for this run
    DownloadFailed {
        episode_title: String,
        url: String,
        error: String,
    },

    /// Entity tag matched; nothing fetched
    Unchanged { episode_title: String },

    /// Verification fetched the body and found identical content
    ContentIdentical { episode_title: String },

    /// Entry published before the recency cutoff, not downloaded
    SkippedOutOfRange { episode_title: String },

    /// Download budget exhausted before this entry
    SkippedLimit { entry_index: usize, limit: i64 },

    /// Episode title changed in the feed
    TitleChanged { old: String, new: String },

    /// Feed-derived metadata changed; old sidecar archived
    MetadataChanged {
        episode_title: String,
        fields: Vec<&'static str>,
    },

    /// A prior version was archived under a timestamped name
    VersionArchived { archived_file: String },

    /// Episode vanished from the feed; file family quarantined
    EpisodeDeleted { title: String },

    /// Episode reappeared in the feed; file family restored
    EpisodeRestored { title: String },

    /// Rewritten output feed was written
    FeedSaved { path: PathBuf },

    /// A feed's sync run completed
    SyncCompleted {
        downloads_count: usize,
        skipped_old_count: usize,
    },
}

/// Trait for reporting sync events.
///
/// Implementations can display progress bars, log messages, or collect
/// statistics.
pub trait Reporter: Send + Sync {
    fn report(&self, event: SyncEvent);
}

/// A shared reference to a reporter
pub type SharedReporter = Arc<dyn Reporter>;

/// A no-op reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn report(&self, _event: SyncEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedReporter {
        Arc::new(Self)
    }
}
