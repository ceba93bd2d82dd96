// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, StoreError};
use crate::sidecar::{self, Sidecar};

/// File holding the persisted per-identifier records, inside the storage dir
pub const STORE_FILENAME: &str = "episodes_metadata.json";

/// Durable record for one episode, keyed in the store by its identifier
/// (the enclosure URL)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Stable local filename; never reused across identifiers
    pub filename: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// True iff the local file currently exists in active storage
    pub downloaded: bool,
    /// True iff absent from the current remote feed and quarantined
    #[serde(default)]
    pub deleted: bool,
    /// Append-only history; at most one entry is current
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
}

/// One historical snapshot reference in an episode's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Archived or current file name
    pub filename: String,
    pub kind: VersionKind,
    pub timestamp: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub is_current: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    /// The live file in active storage
    Current,
    /// An archived prior content version
    Content,
    /// An archived prior sidecar (metadata) version
    Metadata,
}

/// The single source of truth for identifier→filename mapping and version
/// history. All mutation goes through methods that uphold the single-current
/// invariant; callers never edit `versions` directly.
#[derive(Debug)]
pub struct EpisodeStore {
    storage_dir: PathBuf,
    records: BTreeMap<String, EpisodeRecord>,
}

impl EpisodeStore {
    /// Load persisted records from the storage directory, initializing an
    /// empty store (and the directory itself) when nothing exists yet.
    pub fn load(storage_dir: &Path) -> Result<Self, StoreError> {
        if !storage_dir.exists() {
            std::fs::create_dir_all(storage_dir).map_err(|e| {
                StoreError::CreateDirectoryFailed {
                    path: storage_dir.to_path_buf(),
                    source: e,
                }
            })?;
        }

        let path = storage_dir.join(STORE_FILENAME);
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| StoreError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&content).map_err(|e| StoreError::JsonParseFailed {
                path: path.clone(),
                source: e,
            })?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            storage_dir: storage_dir.to_path_buf(),
            records,
        })
    }

    /// Persist all records, atomically replacing the previous state file
    pub fn save(&self) -> Result<(), StoreError> {
        let path = self.storage_dir.join(STORE_FILENAME);
        let tmp = self.storage_dir.join(format!("{STORE_FILENAME}.tmp"));

        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&tmp, json).map_err(|e| StoreError::WriteFailed {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| StoreError::WriteFailed { path, source: e })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Full path of an episode file in active storage
    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.storage_dir.join(filename)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.records.contains_key(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<&EpisodeRecord> {
        self.records.get(identifier)
    }

    pub fn get_mut(&mut self, identifier: &str) -> Option<&mut EpisodeRecord> {
        self.records.get_mut(identifier)
    }

    /// Create the record for a newly seen identifier. Records are never
    /// removed afterwards; quarantined episodes stay with `deleted = true`.
    pub fn insert(&mut self, identifier: &str, record: EpisodeRecord) {
        self.records.insert(identifier.to_string(), record);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EpisodeRecord)> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut EpisodeRecord)> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append the live version entry for an identifier, demoting every prior
    /// entry. No-op for unknown identifiers so version history can never be
    /// orphaned.
    pub fn record_current_version(
        &mut self,
        identifier: &str,
        filename: &str,
        content_hash: Option<String>,
        reason: &str,
    ) {
        let Some(record) = self.records.get_mut(identifier) else {
            return;
        };

        for version in &mut record.versions {
            version.is_current = false;
        }

        record.versions.push(VersionEntry {
            filename: filename.to_string(),
            kind: VersionKind::Current,
            timestamp: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            content_hash,
            is_current: true,
        });
    }

    /// Append an archived (content or metadata) version entry for an
    /// identifier. No-op for unknown identifiers.
    pub fn record_archived_version(
        &mut self,
        identifier: &str,
        kind: VersionKind,
        archived_file: &str,
        reason: &str,
        content_hash: Option<String>,
    ) {
        let Some(record) = self.records.get_mut(identifier) else {
            return;
        };

        for version in &mut record.versions {
            version.is_current = false;
        }

        record.versions.push(VersionEntry {
            filename: archived_file.to_string(),
            kind,
            timestamp: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            content_hash,
            is_current: false,
        });
    }

    /// Load the sidecar metadata companion for a filename, if present
    pub fn load_sidecar(&self, filename: &str) -> Result<Option<Sidecar>, MetadataError> {
        sidecar::read_sidecar(&self.storage_dir, filename)
    }

    /// Write the sidecar metadata companion for a filename
    pub fn save_sidecar(&self, filename: &str, sidecar: &Sidecar) -> Result<(), MetadataError> {
        sidecar::write_sidecar(&self.storage_dir, filename, sidecar)
    }
}
