pub mod archive;
pub mod config;
pub mod deleted;
pub mod episode;
pub mod error;
pub mod feed;
pub mod hash;
pub mod http;
pub mod output;
pub mod progress;
pub mod sidecar;
pub mod snapshot;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use config::{Config, PodcastConfig};
pub use error::{
    ConfigError, DownloadError, FeedError, MetadataError, RelocateError, StoreError, SyncError,
};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use progress::{DownloadKind, NoopReporter, Reporter, SharedReporter, SyncEvent};
pub use store::{EpisodeRecord, EpisodeStore, VersionEntry, VersionKind};
pub use sync::{SyncOptions, SyncResult, sync_feed};
