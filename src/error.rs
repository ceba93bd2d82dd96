use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when fetching or parsing RSS feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to read feed file {path}: {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors that can occur loading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config file {path} defines no podcasts")]
    NoPodcasts { path: PathBuf },
}

/// Errors that can occur during enclosure downloads
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to archive old version of {path}: {source}")]
    ArchiveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to promote {path} into place: {source}")]
    PromoteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur reading or writing sidecar metadata and snapshots
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to read metadata file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write metadata file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse metadata JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize metadata: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),

    #[error("Failed to write snapshot {path}: {source}")]
    SnapshotWriteFailed {
        path: PathBuf,
        #[source]
        source: rss::Error,
    },

    #[error("Failed to parse snapshot {path}: {source}")]
    SnapshotParseFailed {
        path: PathBuf,
        #[source]
        source: rss::Error,
    },
}

/// Errors that can occur loading or saving the episode record store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read record store {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write record store {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse record store {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record store: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur relocating an episode file family
#[derive(Error, Debug)]
pub enum RelocateError {
    #[error("Failed to scan directory {path}: {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create quarantine directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {from} to {to}: {source}")]
    MoveFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur archiving a prior file version
#[derive(Error, Debug)]
#[error("Failed to archive {path}: {source}")]
pub struct ArchiveError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Top-level errors for a single feed's sync run
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Relocation error: {0}")]
    Relocate(#[from] RelocateError),

    #[error("Failed to write output feed {path}: {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: rss::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
