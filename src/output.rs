use std::fs::File;
use std::path::Path;

use crate::error::{FeedError, MetadataError, SyncError};
use crate::feed::Episode;
use crate::snapshot;

/// Name of the rewritten feed written into the storage directory
pub const OUTPUT_FEED_FILENAME: &str = "archival_backup.xml";

/// Title prefix for items whose file is not available locally
const NOT_BACKED_UP_PREFIX: &str = "NOT BACKED UP: ";

/// Title prefix for quarantined items re-appended from their snapshot
const DELETED_UPSTREAM_PREFIX: &str = "DELETED UPSTREAM: ";

/// Builds the rewritten feed: the source channel with enclosure URLs pointed
/// at the local mirror, plus quarantined episodes re-appended from their
/// snapshots.
pub struct FeedBuilder {
    channel: rss::Channel,
    base_url: String,
    extra_items: Vec<rss::Item>,
}

impl FeedBuilder {
    /// Parse the source feed bytes and prepare the channel for rewriting
    pub fn new(xml_bytes: &[u8], base_url: &str) -> Result<Self, FeedError> {
        let mut channel = rss::Channel::read_from(xml_bytes)?;

        let description = format!("{} podcast-backup", channel.title());
        channel.set_description(description);

        Ok(Self {
            channel,
            base_url: base_url.trim_end_matches('/').to_string(),
            extra_items: Vec::new(),
        })
    }

    /// Point a processed entry's enclosure at the local copy.
    ///
    /// Items without a local file keep their entry but get a warning title
    /// prefix, so subscribers can tell the mirror is incomplete.
    pub fn rewrite_entry(&mut self, entry: &Episode, filename: &str, downloaded: bool) {
        let Some(original_url) = entry.identifier() else {
            return;
        };
        let local_url = format!("{}/{}", self.base_url, filename);

        for item in self.channel.items_mut() {
            let matched = item.enclosure().is_some_and(|e| e.url() == original_url);
            if !matched {
                continue;
            }

            if let Some(enclosure) = item.enclosure() {
                let mut enclosure = enclosure.clone();
                enclosure.set_url(local_url.clone());
                item.set_enclosure(enclosure);
            }

            if !downloaded {
                let title = item.title().unwrap_or(&entry.title).to_string();
                item.set_title(format!("{NOT_BACKED_UP_PREFIX}{title}"));
            }
            break;
        }
    }

    /// Re-append a quarantined episode from its snapshot, with its enclosure
    /// pointing at the quarantine path.
    ///
    /// Returns false when no snapshot exists in either location; the episode
    /// then stays absent from the output feed.
    pub fn append_deleted(
        &mut self,
        storage_dir: &Path,
        deleted_dir: &Path,
        filename: &str,
    ) -> Result<bool, MetadataError> {
        let item = match snapshot::read_snapshot(storage_dir, filename)? {
            Some(item) => Some(item),
            None => snapshot::read_snapshot(deleted_dir, filename)?,
        };
        let Some(mut item) = item else {
            return Ok(false);
        };

        if let Some(title) = item.title() {
            let title = title.to_string();
            item.set_title(format!("{DELETED_UPSTREAM_PREFIX}{title}"));
        }

        if let Some(enclosure) = item.enclosure() {
            let mut enclosure = enclosure.clone();
            enclosure.set_url(format!("{}/deleted/{}", self.base_url, filename));
            item.set_enclosure(enclosure);
        }

        self.extra_items.push(item);
        Ok(true)
    }

    /// Write the rewritten feed to disk with human-readable formatting
    pub fn save(mut self, path: &Path) -> Result<(), SyncError> {
        if !self.extra_items.is_empty() {
            let mut items = self.channel.items().to_vec();
            items.append(&mut self.extra_items);
            self.channel.set_items(items);
        }

        let file = File::create(path).map_err(|e| SyncError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        self.channel
            .pretty_write_to(file, b' ', 2)
            .map(|_| ())
            .map_err(|e| SyncError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })
    }
}
