// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::sync::SyncOptions;

/// TOML configuration for a backup run.
///
/// ```toml
/// storage_dir = "/srv/podcasts"
/// max_downloads = 0
/// days_to_download = 0
///
/// [[podcasts]]
/// name = "my-show"
/// feed_url = "https://example.com/feed.xml"
/// base_url = "https://mirror.example.com/my-show"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory; each podcast gets a subdirectory named after it
    pub storage_dir: PathBuf,
    /// Download cap applied to every podcast unless overridden: negative
    /// disables downloading, zero means unlimited
    #[serde(default)]
    pub max_downloads: i64,
    /// Recency filter in days applied to every podcast unless overridden;
    /// zero disables it
    #[serde(default)]
    pub days_to_download: i64,
    pub podcasts: Vec<PodcastConfig>,
}

/// One subscribed feed
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PodcastConfig {
    /// Directory name under `storage_dir`; must be unique
    pub name: String,
    /// Feed URL, or a local file path for testing
    pub feed_url: String,
    /// Public URL prefix the rewritten feed points enclosures at
    pub base_url: String,
    pub max_downloads: Option<i64>,
    pub days_to_download: Option<i64>,
}

impl Config {
    /// Load and validate the configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        if config.podcasts.is_empty() {
            return Err(ConfigError::NoPodcasts {
                path: path.to_path_buf(),
            });
        }

        Ok(config)
    }

    /// Storage directory for one podcast
    pub fn storage_dir_for(&self, podcast: &PodcastConfig) -> PathBuf {
        self.storage_dir.join(&podcast.name)
    }

    /// Effective sync options for one podcast, with per-podcast overrides
    /// falling back to the global values
    pub fn options_for(&self, podcast: &PodcastConfig) -> SyncOptions {
        SyncOptions {
            max_downloads: podcast.max_downloads.unwrap_or(self.max_downloads),
            days_to_download: podcast.days_to_download.unwrap_or(self.days_to_download),
            base_url: podcast.base_url.clone(),
        }
    }
}
