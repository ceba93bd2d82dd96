use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::feed::Episode;

/// Per-file metadata companion, stored as `<filename>.json` next to the
/// episode file.
///
/// Derived from the episode record at save time; not authoritative, and
/// rebuildable from the record plus the live file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    pub saved_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Sidecar {
    /// Build a sidecar from a feed entry plus the file's hash and entity tag
    pub fn from_episode(
        episode: &Episode,
        source_url: &str,
        content_hash: Option<String>,
        etag: Option<String>,
    ) -> Self {
        Self {
            title: episode.title.clone(),
            description: episode.description.clone(),
            source_url: source_url.to_string(),
            published: episode.published.clone(),
            saved_at: Utc::now().to_rfc3339(),
            content_hash,
            etag,
        }
    }

    /// True if the feed-derived fields differ from the given entry.
    ///
    /// Only title, description, published and source URL participate; the
    /// hash, etag and save timestamp are file state, not feed metadata.
    pub fn feed_fields_differ(&self, episode: &Episode, source_url: &str) -> bool {
        !self.changed_feed_fields(episode, source_url).is_empty()
    }

    /// Names of the feed-derived fields that differ from the given entry
    pub fn changed_feed_fields(&self, episode: &Episode, source_url: &str) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.title != episode.title {
            changed.push("title");
        }
        if self.description != episode.description {
            changed.push("description");
        }
        if self.published != episode.published {
            changed.push("published");
        }
        if self.source_url != source_url {
            changed.push("source_url");
        }
        changed
    }
}

fn sidecar_path(dir: &Path, filename: &str) -> std::path::PathBuf {
    dir.join(format!("{filename}.json"))
}

/// Write the sidecar JSON for a filename
pub fn write_sidecar(dir: &Path, filename: &str, sidecar: &Sidecar) -> Result<(), MetadataError> {
    let path = sidecar_path(dir, filename);
    let json = serde_json::to_string_pretty(sidecar)?;
    std::fs::write(&path, json).map_err(|e| MetadataError::WriteFailed { path, source: e })
}

/// Read the sidecar JSON for a filename, `None` if it does not exist
pub fn read_sidecar(dir: &Path, filename: &str) -> Result<Option<Sidecar>, MetadataError> {
    let path = sidecar_path(dir, filename);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| MetadataError::ReadFailed {
        path: path.clone(),
        source: e,
    })?;

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| MetadataError::JsonParseFailed { path, source: e })
}
