// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use url::Url;

use crate::archive;
use crate::deleted::{self, quarantine_dir};
use crate::episode::{cleanup_partial_files, download_enclosure, generate_filename};
use crate::error::{FeedError, SyncError};
use crate::feed::{
    Episode, fetch_feed_bytes, file_path_to_url, is_url, parse_feed, parse_pub_date,
    read_feed_file,
};
use crate::hash::hash_file;
use crate::http::{HttpClient, RemoteInfo, probe_remote};
use crate::output::{FeedBuilder, OUTPUT_FEED_FILENAME};
use crate::progress::{DownloadKind, Reporter, SyncEvent};
use crate::sidecar::Sidecar;
use crate::snapshot;
use crate::store::{EpisodeRecord, EpisodeStore, VersionKind};

/// Per-feed sync settings
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Cap on successful downloads per run: negative disables downloading
    /// entirely, zero means unlimited
    pub max_downloads: i64,
    /// Only download entries published within this many days; zero disables
    /// the filter
    pub days_to_download: i64,
    /// Public base URL the rewritten feed points enclosures at
    pub base_url: String,
}

/// Counters from one feed's completed sync run
#[derive(Debug, Clone, Copy)]
pub struct SyncResult {
    pub total_entries: usize,
    pub downloads_count: usize,
    pub skipped_old_count: usize,
}

/// What processing one feed entry yielded: its stable filename and whether
/// the file is available in local storage afterwards
struct ProcessedEntry {
    filename: String,
    available: bool,
}

/// Drives the per-entry decision procedure against the record store.
///
/// Entries are handled strictly in feed order; the engine holds the mutable
/// store borrow for the duration of a run.
struct SyncEngine<'a, C: HttpClient> {
    client: &'a C,
    store: &'a mut EpisodeStore,
    storage_dir: PathBuf,
    deleted_dir: PathBuf,
    max_downloads: i64,
    cutoff: Option<DateTime<Utc>>,
    downloads_count: usize,
    skipped_old_count: usize,
    reporter: &'a dyn Reporter,
}

impl<'a, C: HttpClient> SyncEngine<'a, C> {
    fn new(
        client: &'a C,
        store: &'a mut EpisodeStore,
        deleted_dir: PathBuf,
        options: &SyncOptions,
        reporter: &'a dyn Reporter,
    ) -> Self {
        let cutoff = (options.days_to_download > 0)
            .then(|| Utc::now() - Duration::days(options.days_to_download));
        let storage_dir = store.storage_dir().to_path_buf();

        Self {
            client,
            store,
            storage_dir,
            deleted_dir,
            max_downloads: options.max_downloads,
            cutoff,
            downloads_count: 0,
            skipped_old_count: 0,
            reporter,
        }
    }

    fn downloads_count(&self) -> usize {
        self.downloads_count
    }

    fn skipped_old_count(&self) -> usize {
        self.skipped_old_count
    }

    /// Process one feed entry. Entries without an enclosure have no media to
    /// mirror and yield `None`.
    ///
    /// Download failures are reported and leave the entry for the next run;
    /// they never abort the feed.
    async fn process_entry(
        &mut self,
        entry: &Episode,
        entry_index: usize,
    ) -> Result<Option<ProcessedEntry>, SyncError> {
        let Some(identifier) = entry.identifier() else {
            return Ok(None);
        };
        let identifier = identifier.to_string();

        let known = self
            .store
            .get(&identifier)
            .map(|record| (record.filename.clone(), record.deleted));

        match known {
            Some((filename, was_deleted)) => self
                .process_known(entry, &identifier, filename, was_deleted)
                .await
                .map(Some),
            None => self
                .process_new(entry, &identifier, entry_index)
                .await
                .map(Some),
        }
    }

    /// First sighting of an identifier: create its record, then download if
    /// the budget and recency filter allow.
    async fn process_new(
        &mut self,
        entry: &Episode,
        identifier: &str,
        entry_index: usize,
    ) -> Result<ProcessedEntry, SyncError> {
        let filename = generate_filename(entry);
        let file_path = self.storage_dir.join(&filename);

        // The record must exist before any version tracking can attach to it
        self.store.insert(
            identifier,
            EpisodeRecord {
                filename: filename.clone(),
                title: entry.title.clone(),
                description: entry.description.clone(),
                published: entry.published.clone(),
                downloaded: file_path.exists(),
                deleted: false,
                versions: Vec::new(),
            },
        );

        if !self.can_download() {
            if self.limit_reached() {
                self.reporter.report(SyncEvent::SkippedLimit {
                    entry_index,
                    limit: self.max_downloads,
                });
            }
            let available = file_path.exists();
            return Ok(ProcessedEntry {
                filename,
                available,
            });
        }

        if !self.within_date_range(entry) {
            self.skipped_old_count += 1;
            self.reporter.report(SyncEvent::SkippedOutOfRange {
                episode_title: entry.title.clone(),
            });
            let available = file_path.exists();
            return Ok(ProcessedEntry {
                filename,
                available,
            });
        }

        let remote_etag = probe_remote(self.client, identifier)
            .await
            .and_then(|info| info.etag);

        match download_enclosure(
            self.client,
            identifier,
            &file_path,
            None,
            &entry.title,
            DownloadKind::New,
            self.reporter,
        )
        .await
        {
            Ok(outcome) => {
                self.downloads_count += 1;
                self.save_episode_files(
                    entry,
                    identifier,
                    &filename,
                    Some(outcome.hash),
                    remote_etag,
                    "Initial download",
                )?;
                Ok(ProcessedEntry {
                    filename,
                    available: true,
                })
            }
            Err(e) => {
                self.reporter.report(SyncEvent::DownloadFailed {
                    episode_title: entry.title.clone(),
                    url: identifier.to_string(),
                    error: e.to_string(),
                });
                Ok(ProcessedEntry {
                    filename,
                    available: false,
                })
            }
        }
    }

    /// Known identifier: restore from quarantine if it reappeared, fold in
    /// metadata changes, then re-download or compare against the remote.
    async fn process_known(
        &mut self,
        entry: &Episode,
        identifier: &str,
        filename: String,
        was_deleted: bool,
    ) -> Result<ProcessedEntry, SyncError> {
        if was_deleted {
            let restored =
                deleted::restore_from_deleted(&self.storage_dir, &self.deleted_dir, &filename)?;
            if let Some(record) = self.store.get_mut(identifier) {
                record.deleted = false;
            }
            if restored {
                self.reporter.report(SyncEvent::EpisodeRestored {
                    title: entry.title.clone(),
                });
            }
        }

        let metadata_changed = self.refresh_metadata_state(entry, identifier, &filename)?;

        if let Some(record) = self.store.get_mut(identifier) {
            if record.title != entry.title {
                self.reporter.report(SyncEvent::TitleChanged {
                    old: record.title.clone(),
                    new: entry.title.clone(),
                });
                record.title = entry.title.clone();
            }
            record.description = entry.description.clone();
            record.published = entry.published.clone();
        }

        let file_path = self.storage_dir.join(&filename);
        if !file_path.exists() {
            return self
                .handle_missing_file(entry, identifier, filename, &file_path)
                .await;
        }

        self.check_for_updates(entry, identifier, filename, &file_path, metadata_changed)
            .await
    }

    /// Compare the entry's feed metadata against its sidecar. A difference
    /// archives the old sidecar under a timestamped name and appends a
    /// metadata version entry before the new state is written later.
    fn refresh_metadata_state(
        &mut self,
        entry: &Episode,
        identifier: &str,
        filename: &str,
    ) -> Result<bool, SyncError> {
        let Some(sidecar) = self.store.load_sidecar(filename)? else {
            return Ok(false);
        };

        let fields = sidecar.changed_feed_fields(entry, identifier);
        if fields.is_empty() {
            return Ok(false);
        }

        self.reporter.report(SyncEvent::MetadataChanged {
            episode_title: entry.title.clone(),
            fields: fields.clone(),
        });

        let sidecar_path = self.storage_dir.join(format!("{filename}.json"));
        let archived = archive::archive(&sidecar_path).map_err(|e| SyncError::Io {
            path: e.path,
            source: e.source,
        })?;

        if let Some(archived) = archived {
            self.reporter.report(SyncEvent::VersionArchived {
                archived_file: archived.archived_file.clone(),
            });
            let reason = format!("Metadata changed ({})", fields.join(", "));
            self.store.record_archived_version(
                identifier,
                VersionKind::Metadata,
                &archived.archived_file,
                &reason,
                sidecar.content_hash.clone(),
            );
        }

        // Replace the archived sidecar right away; a later probe failure or
        // exhausted download budget must not leave the file without one
        self.write_companions(
            entry,
            identifier,
            filename,
            sidecar.content_hash.clone(),
            sidecar.etag.clone(),
        )?;

        Ok(true)
    }

    /// The local file vanished outside our control; fetch it again
    async fn handle_missing_file(
        &mut self,
        entry: &Episode,
        identifier: &str,
        filename: String,
        file_path: &Path,
    ) -> Result<ProcessedEntry, SyncError> {
        if !self.can_download() {
            return Ok(ProcessedEntry {
                filename,
                available: false,
            });
        }

        if !self.within_date_range(entry) {
            self.skipped_old_count += 1;
            self.reporter.report(SyncEvent::SkippedOutOfRange {
                episode_title: entry.title.clone(),
            });
            return Ok(ProcessedEntry {
                filename,
                available: false,
            });
        }

        let was_downloaded = self.store.get(identifier).is_some_and(|r| r.downloaded);
        let kind = if was_downloaded {
            DownloadKind::Redownload
        } else {
            DownloadKind::New
        };

        let remote_etag = probe_remote(self.client, identifier)
            .await
            .and_then(|info| info.etag);

        match download_enclosure(
            self.client,
            identifier,
            file_path,
            None,
            &entry.title,
            kind,
            self.reporter,
        )
        .await
        {
            Ok(outcome) => {
                self.downloads_count += 1;
                let reason = if was_downloaded {
                    "Re-downloaded missing file"
                } else {
                    "Initial download"
                };
                self.save_episode_files(
                    entry,
                    identifier,
                    &filename,
                    Some(outcome.hash),
                    remote_etag,
                    reason,
                )?;
                Ok(ProcessedEntry {
                    filename,
                    available: true,
                })
            }
            Err(e) => {
                self.reporter.report(SyncEvent::DownloadFailed {
                    episode_title: entry.title.clone(),
                    url: identifier.to_string(),
                    error: e.to_string(),
                });
                Ok(ProcessedEntry {
                    filename,
                    available: false,
                })
            }
        }
    }

    /// Three-tier change detection for a present file: entity tag, then
    /// declared size, then a hash-comparing verification fetch.
    async fn check_for_updates(
        &mut self,
        entry: &Episode,
        identifier: &str,
        filename: String,
        file_path: &Path,
        metadata_changed: bool,
    ) -> Result<ProcessedEntry, SyncError> {
        let Some(sidecar) = self.store.load_sidecar(&filename)? else {
            // Sidecar lost; rebuild it from the live file and move on
            let hash = hash_file(file_path).await.map_err(|e| SyncError::Io {
                path: file_path.to_path_buf(),
                source: e,
            })?;
            let etag = probe_remote(self.client, identifier)
                .await
                .and_then(|info| info.etag);
            self.save_episode_files(
                entry,
                identifier,
                &filename,
                hash,
                etag,
                "Rebuilt missing metadata",
            )?;
            return Ok(ProcessedEntry {
                filename,
                available: true,
            });
        };

        let stored_hash = sidecar.content_hash.clone();
        let stored_etag = sidecar.etag.clone();

        let Some(remote) = probe_remote(self.client, identifier).await else {
            // No remote headers, no comparison; leave the file as is
            return Ok(ProcessedEntry {
                filename,
                available: true,
            });
        };

        if stored_etag.is_some() && stored_etag == remote.etag {
            self.reporter.report(SyncEvent::Unchanged {
                episode_title: entry.title.clone(),
            });
            if metadata_changed {
                self.save_episode_files(
                    entry,
                    identifier,
                    &filename,
                    stored_hash,
                    remote.etag,
                    "Updated metadata",
                )?;
            }
            return Ok(ProcessedEntry {
                filename,
                available: true,
            });
        }

        if self.remote_size_differs(file_path, &remote) {
            return self
                .update_episode(
                    entry,
                    identifier,
                    filename,
                    file_path,
                    stored_hash,
                    remote.etag,
                    DownloadKind::Update,
                )
                .await;
        }

        if remote.etag.is_some() && remote.etag != stored_etag {
            return self
                .update_episode(
                    entry,
                    identifier,
                    filename,
                    file_path,
                    stored_hash,
                    remote.etag,
                    DownloadKind::Verify,
                )
                .await;
        }

        if metadata_changed {
            let etag = remote.etag.or(stored_etag);
            self.save_episode_files(
                entry,
                identifier,
                &filename,
                stored_hash,
                etag,
                "Updated metadata",
            )?;
        }

        Ok(ProcessedEntry {
            filename,
            available: true,
        })
    }

    /// Fetch an apparently changed enclosure and promote it only when the
    /// bytes really differ; identical content just refreshes the validator.
    async fn update_episode(
        &mut self,
        entry: &Episode,
        identifier: &str,
        filename: String,
        file_path: &Path,
        stored_hash: Option<String>,
        remote_etag: Option<String>,
        kind: DownloadKind,
    ) -> Result<ProcessedEntry, SyncError> {
        if !self.can_download() {
            return Ok(ProcessedEntry {
                filename,
                available: true,
            });
        }

        if !self.within_date_range(entry) {
            self.skipped_old_count += 1;
            self.reporter.report(SyncEvent::SkippedOutOfRange {
                episode_title: entry.title.clone(),
            });
            return Ok(ProcessedEntry {
                filename,
                available: true,
            });
        }

        match download_enclosure(
            self.client,
            identifier,
            file_path,
            stored_hash.as_deref(),
            &entry.title,
            kind,
            self.reporter,
        )
        .await
        {
            Ok(outcome) => {
                self.downloads_count += 1;
                if outcome.changed {
                    if let Some(archived) = &outcome.archived {
                        self.store.record_archived_version(
                            identifier,
                            VersionKind::Content,
                            &archived.archived_file,
                            "Content changed",
                            stored_hash.clone(),
                        );
                    }
                    self.save_episode_files(
                        entry,
                        identifier,
                        &filename,
                        Some(outcome.hash),
                        remote_etag,
                        "Updated content",
                    )?;
                } else {
                    self.reporter.report(SyncEvent::ContentIdentical {
                        episode_title: entry.title.clone(),
                    });
                    // Remember the new validator so the next run can
                    // short-circuit on it
                    self.write_companions(
                        entry,
                        identifier,
                        &filename,
                        Some(outcome.hash),
                        remote_etag,
                    )?;
                }
                Ok(ProcessedEntry {
                    filename,
                    available: true,
                })
            }
            Err(e) => {
                self.reporter.report(SyncEvent::DownloadFailed {
                    episode_title: entry.title.clone(),
                    url: identifier.to_string(),
                    error: e.to_string(),
                });
                Ok(ProcessedEntry {
                    filename,
                    available: true,
                })
            }
        }
    }

    /// Write sidecar and snapshot, append the current version entry, and
    /// refresh the record's downloaded flag
    fn save_episode_files(
        &mut self,
        entry: &Episode,
        identifier: &str,
        filename: &str,
        hash: Option<String>,
        etag: Option<String>,
        reason: &str,
    ) -> Result<(), SyncError> {
        self.write_companions(entry, identifier, filename, hash.clone(), etag)?;
        self.store
            .record_current_version(identifier, filename, hash, reason);

        let downloaded = self.storage_dir.join(filename).exists();
        if let Some(record) = self.store.get_mut(identifier) {
            record.downloaded = downloaded;
        }
        Ok(())
    }

    fn write_companions(
        &self,
        entry: &Episode,
        identifier: &str,
        filename: &str,
        hash: Option<String>,
        etag: Option<String>,
    ) -> Result<(), SyncError> {
        let sidecar = Sidecar::from_episode(entry, identifier, hash, etag);
        self.store.save_sidecar(filename, &sidecar)?;
        snapshot::write_snapshot(&self.storage_dir, filename, entry)?;
        Ok(())
    }

    fn remote_size_differs(&self, file_path: &Path, remote: &RemoteInfo) -> bool {
        let Some(remote_len) = remote.content_length else {
            return false;
        };
        match std::fs::metadata(file_path) {
            Ok(meta) => meta.len() != remote_len,
            Err(_) => true,
        }
    }

    fn can_download(&self) -> bool {
        if self.max_downloads < 0 {
            return false;
        }
        if self.max_downloads == 0 {
            return true;
        }
        self.downloads_count < self.max_downloads as usize
    }

    fn limit_reached(&self) -> bool {
        self.max_downloads > 0 && self.downloads_count >= self.max_downloads as usize
    }

    fn within_date_range(&self, entry: &Episode) -> bool {
        let Some(cutoff) = self.cutoff else {
            return true;
        };
        let Some(published) = entry.published.as_deref() else {
            return false;
        };
        match parse_pub_date(published) {
            Some(date) => date.with_timezone(&Utc) >= cutoff,
            None => false,
        }
    }
}

/// Run one full sync pass for a feed: fetch, reconcile deletions, process
/// every entry in feed order, persist the store, and write the rewritten
/// output feed.
pub async fn sync_feed<C: HttpClient>(
    client: &C,
    feed_source: &str,
    storage_dir: &Path,
    options: &SyncOptions,
    reporter: &dyn Reporter,
) -> Result<SyncResult, SyncError> {
    let (bytes, feed_url) = if is_url(feed_source) {
        reporter.report(SyncEvent::FetchingFeed {
            url: feed_source.to_string(),
        });
        let bytes = fetch_feed_bytes(client, feed_source).await?;
        let url = Url::parse(feed_source).map_err(FeedError::from)?;
        (bytes.to_vec(), url)
    } else {
        let path = Path::new(feed_source);
        (read_feed_file(path)?, file_path_to_url(path))
    };

    let podcast = parse_feed(&bytes, feed_url)?;
    reporter.report(SyncEvent::FeedParsed {
        podcast_title: podcast.title.clone(),
        total_entries: podcast.episodes.len(),
    });

    let mut store = EpisodeStore::load(storage_dir)?;

    let cleaned = cleanup_partial_files(storage_dir).map_err(|e| SyncError::Io {
        path: storage_dir.to_path_buf(),
        source: e,
    })?;
    if cleaned > 0 {
        reporter.report(SyncEvent::PartialFilesCleaned { count: cleaned });
    }

    let deleted_dir = quarantine_dir(storage_dir);
    let live_identifiers: HashSet<String> = podcast
        .episodes
        .iter()
        .filter_map(|e| e.identifier().map(String::from))
        .collect();
    deleted::reconcile(&mut store, &live_identifiers, &deleted_dir, reporter)?;

    let mut builder = FeedBuilder::new(&bytes, &options.base_url)?;

    let (downloads_count, skipped_old_count) = {
        let mut engine = SyncEngine::new(client, &mut store, deleted_dir.clone(), options, reporter);
        for (index, entry) in podcast.episodes.iter().enumerate() {
            if let Some(processed) = engine.process_entry(entry, index + 1).await? {
                builder.rewrite_entry(entry, &processed.filename, processed.available);
            }
        }
        (engine.downloads_count(), engine.skipped_old_count())
    };

    // Quarantined episodes stay subscribable through their snapshots
    for (identifier, record) in store.iter() {
        if record.deleted && !live_identifiers.contains(identifier) {
            builder.append_deleted(storage_dir, &deleted_dir, &record.filename)?;
        }
    }

    store.save()?;

    let output_path = storage_dir.join(OUTPUT_FEED_FILENAME);
    builder.save(&output_path)?;
    reporter.report(SyncEvent::FeedSaved {
        path: output_path,
    });

    reporter.report(SyncEvent::SyncCompleted {
        downloads_count,
        skipped_old_count,
    });

    Ok(SyncResult {
        total_entries: podcast.episodes.len(),
        downloads_count,
        skipped_old_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ByteStream, HttpResponse};
    use crate::progress::NoopReporter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const FEED_URL: &str = "https://feeds.test/show.xml";
    const PUB_DATE: &str = "Mon, 15 Jan 2024 12:00:00 +0000";

    #[derive(Clone)]
    struct MockResource {
        data: Vec<u8>,
        etag: Option<String>,
    }

    #[derive(Clone, Default)]
    struct MockHttpClient {
        feed_xml: Arc<Mutex<String>>,
        resources: Arc<Mutex<HashMap<String, MockResource>>>,
        failing_heads: Arc<Mutex<HashSet<String>>>,
        head_calls: Arc<AtomicUsize>,
        stream_calls: Arc<AtomicUsize>,
    }

    // A real reqwest::Error without touching the network: an empty host can
    // never produce a buildable request
    fn transport_error() -> reqwest::Error {
        reqwest::Client::new()
            .get("http://")
            .build()
            .expect_err("empty host cannot build")
    }

    impl MockHttpClient {
        fn set_feed(&self, xml: String) {
            *self.feed_xml.lock().unwrap() = xml;
        }

        fn set_resource(&self, url: &str, data: &[u8], etag: &str) {
            self.resources.lock().unwrap().insert(
                url.to_string(),
                MockResource {
                    data: data.to_vec(),
                    etag: Some(etag.to_string()),
                },
            );
        }

        fn fail_head(&self, url: &str) {
            self.failing_heads.lock().unwrap().insert(url.to_string());
        }

        fn stream_calls(&self) -> usize {
            self.stream_calls.load(Ordering::SeqCst)
        }

        fn head_calls(&self) -> usize {
            self.head_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<Bytes, reqwest::Error> {
            Ok(Bytes::from(self.feed_xml.lock().unwrap().clone()))
        }

        async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let resource = self.resources.lock().unwrap().get(url).cloned();
            let (status, data) = match resource {
                Some(r) => (200, r.data),
                None => (404, Vec::new()),
            };
            let len = data.len() as u64;
            let stream: ByteStream =
                Box::pin(futures::stream::once(async move { Ok(Bytes::from(data)) }));
            Ok(HttpResponse {
                status,
                content_length: Some(len),
                body: stream,
            })
        }

        async fn head(&self, url: &str) -> Result<RemoteInfo, reqwest::Error> {
            self.head_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_heads.lock().unwrap().contains(url) {
                return Err(transport_error());
            }
            Ok(match self.resources.lock().unwrap().get(url) {
                Some(r) => RemoteInfo {
                    content_length: Some(r.data.len() as u64),
                    etag: r.etag.clone(),
                },
                None => RemoteInfo::default(),
            })
        }
    }

    /// Reporter that records every event for assertions
    #[derive(Default)]
    struct CollectingReporter {
        events: Mutex<Vec<SyncEvent>>,
    }

    impl Reporter for CollectingReporter {
        fn report(&self, event: SyncEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn feed_with(items: &[(&str, &str, &str)]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Mock Show</title>
    <description>A show used in tests</description>
    <link>https://example.com</link>
"#,
        );
        for (title, url, pub_date) in items {
            xml.push_str(&format!(
                r#"    <item>
      <title>{title}</title>
      <description>About {title}</description>
      <pubDate>{pub_date}</pubDate>
      <enclosure url="{url}" length="0" type="audio/mpeg"/>
    </item>
"#
            ));
        }
        xml.push_str("  </channel>\n</rss>\n");
        xml
    }

    fn mirror_options() -> SyncOptions {
        SyncOptions {
            base_url: "https://mirror.test/pod".to_string(),
            ..SyncOptions::default()
        }
    }

    async fn run(client: &MockHttpClient, dir: &Path, options: &SyncOptions) -> SyncResult {
        sync_feed(client, FEED_URL, dir, options, &NoopReporter)
            .await
            .unwrap()
    }

    fn single_record(dir: &Path) -> (String, EpisodeRecord) {
        let store = EpisodeStore::load(dir).unwrap();
        let (id, record) = store.iter().next().unwrap();
        (id.clone(), record.clone())
    }

    #[tokio::test]
    async fn first_run_downloads_all_episodes() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[
            ("Episode One", "https://cdn.test/ep1.mp3", PUB_DATE),
            ("Episode Two", "https://cdn.test/ep2.mp3", PUB_DATE),
        ]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio one", "\"e1\"");
        client.set_resource("https://cdn.test/ep2.mp3", b"audio two", "\"e2\"");

        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.total_entries, 2);
        assert_eq!(result.downloads_count, 2);
        assert_eq!(result.skipped_old_count, 0);

        let store = EpisodeStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        for (_, record) in store.iter() {
            assert!(record.downloaded);
            assert!(!record.deleted);
            assert_eq!(record.versions.len(), 1);
            assert!(record.versions[0].is_current);
            let file = dir.path().join(&record.filename);
            assert!(file.exists());
            assert!(dir.path().join(format!("{}.json", record.filename)).exists());
            assert!(
                dir.path()
                    .join(format!("{}.rss.xml", record.filename))
                    .exists()
            );
        }
    }

    #[tokio::test]
    async fn unchanged_feed_second_run_is_a_noop() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio one", "\"e1\"");

        run(&client, dir.path(), &mirror_options()).await;
        let streams_after_first = client.stream_calls();

        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.downloads_count, 0);
        // Entity tag matched; no body was fetched again
        assert_eq!(client.stream_calls(), streams_after_first);

        let (_, record) = single_record(dir.path());
        assert_eq!(record.versions.len(), 1);
        assert!(record.versions[0].is_current);
    }

    #[tokio::test]
    async fn etag_match_short_circuits_even_with_bad_stored_hash() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio one", "\"e1\"");

        run(&client, dir.path(), &mirror_options()).await;
        let streams_after_first = client.stream_calls();

        // Corrupt the stored hash; the etag tier must still win
        let (_, record) = single_record(dir.path());
        let store = EpisodeStore::load(dir.path()).unwrap();
        let mut sidecar = store.load_sidecar(&record.filename).unwrap().unwrap();
        sidecar.content_hash = Some("0000corrupted0000".to_string());
        store.save_sidecar(&record.filename, &sidecar).unwrap();

        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.downloads_count, 0);
        assert_eq!(client.stream_calls(), streams_after_first);
        assert!(client.head_calls() > 0);
    }

    #[tokio::test]
    async fn max_downloads_caps_successful_downloads() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[
            ("One", "https://cdn.test/1.mp3", PUB_DATE),
            ("Two", "https://cdn.test/2.mp3", PUB_DATE),
            ("Three", "https://cdn.test/3.mp3", PUB_DATE),
        ]));
        for n in 1..=3 {
            client.set_resource(
                &format!("https://cdn.test/{n}.mp3"),
                format!("audio {n}").as_bytes(),
                &format!("\"e{n}\""),
            );
        }

        let options = SyncOptions {
            max_downloads: 2,
            ..mirror_options()
        };
        let reporter = CollectingReporter::default();
        let result = sync_feed(&client, FEED_URL, dir.path(), &options, &reporter)
            .await
            .unwrap();

        assert_eq!(result.downloads_count, 2);

        let store = EpisodeStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 3);
        let undownloaded: Vec<_> = store
            .iter()
            .filter(|(_, r)| !r.downloaded)
            .collect();
        assert_eq!(undownloaded.len(), 1);

        let events = reporter.events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SyncEvent::SkippedLimit { limit: 2, .. }))
        );

        // The capped entry is flagged in the output feed
        let output = std::fs::read_to_string(dir.path().join(OUTPUT_FEED_FILENAME)).unwrap();
        assert!(output.contains("NOT BACKED UP: Three"));
        assert!(!output.contains("NOT BACKED UP: One"));
    }

    #[tokio::test]
    async fn negative_max_downloads_disables_downloading() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "One",
            "https://cdn.test/1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/1.mp3", b"audio", "\"e1\"");

        let options = SyncOptions {
            max_downloads: -1,
            ..mirror_options()
        };
        let result = run(&client, dir.path(), &options).await;

        assert_eq!(result.downloads_count, 0);
        assert_eq!(client.stream_calls(), 0);
        // The record is still created for future runs
        let store = EpisodeStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn recency_filter_skips_old_entries() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();

        let recent = (Utc::now() - Duration::days(3))
            .format("%a, %d %b %Y %H:%M:%S +0000")
            .to_string();
        let old = (Utc::now() - Duration::days(10))
            .format("%a, %d %b %Y %H:%M:%S +0000")
            .to_string();

        client.set_feed(feed_with(&[
            ("Recent", "https://cdn.test/recent.mp3", &recent),
            ("Old", "https://cdn.test/old.mp3", &old),
        ]));
        client.set_resource("https://cdn.test/recent.mp3", b"new audio", "\"r\"");
        client.set_resource("https://cdn.test/old.mp3", b"old audio", "\"o\"");

        let options = SyncOptions {
            days_to_download: 7,
            ..mirror_options()
        };
        let result = run(&client, dir.path(), &options).await;

        assert_eq!(result.downloads_count, 1);
        assert_eq!(result.skipped_old_count, 1);
    }

    #[tokio::test]
    async fn recency_filter_excludes_entries_without_parseable_dates() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Undated",
            "https://cdn.test/undated.mp3",
            "sometime last week",
        )]));
        client.set_resource("https://cdn.test/undated.mp3", b"audio", "\"u\"");

        let options = SyncOptions {
            days_to_download: 7,
            ..mirror_options()
        };
        let result = run(&client, dir.path(), &options).await;

        // While the filter is active an unparseable date cannot qualify
        assert_eq!(result.downloads_count, 0);
        assert_eq!(result.skipped_old_count, 1);
        assert_eq!(client.stream_calls(), 0);
    }

    #[tokio::test]
    async fn failed_probe_leaves_entry_untouched_for_this_run() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio one", "\"e1\"");

        run(&client, dir.path(), &mirror_options()).await;
        let streams_after_first = client.stream_calls();
        let (_, before) = single_record(dir.path());

        // Probe starts failing; no comparison is possible this run
        client.fail_head("https://cdn.test/ep1.mp3");
        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.downloads_count, 0);
        assert_eq!(client.stream_calls(), streams_after_first);
        let (_, after) = single_record(dir.path());
        assert_eq!(after.versions.len(), before.versions.len());
        assert!(dir.path().join(&after.filename).exists());
    }

    #[tokio::test]
    async fn metadata_refresh_survives_a_skipped_update() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Working Title",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"short", "\"v1\"");

        run(&client, dir.path(), &mirror_options()).await;

        // Title edited while the content also changed, but downloading is
        // disabled: the update path bails out after the sidecar was archived
        client.set_feed(feed_with(&[(
            "Final Title",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"a much longer replacement", "\"v2\"");
        let options = SyncOptions {
            max_downloads: -1,
            ..mirror_options()
        };
        let result = run(&client, dir.path(), &options).await;
        assert_eq!(result.downloads_count, 0);

        // The archived sidecar got a replacement on disk immediately
        let (_, record) = single_record(dir.path());
        let store = EpisodeStore::load(dir.path()).unwrap();
        let sidecar = store.load_sidecar(&record.filename).unwrap().unwrap();
        assert_eq!(sidecar.title, "Final Title");
        assert!(
            std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().contains(".json.pre-"))
        );
    }

    #[tokio::test]
    async fn deleted_episode_is_quarantined_and_restored() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        let both = feed_with(&[
            ("Keeper", "https://cdn.test/keep.mp3", PUB_DATE),
            ("Vanisher", "https://cdn.test/gone.mp3", PUB_DATE),
        ]);
        let only_keeper = feed_with(&[("Keeper", "https://cdn.test/keep.mp3", PUB_DATE)]);
        client.set_resource("https://cdn.test/keep.mp3", b"keep audio", "\"k\"");
        client.set_resource("https://cdn.test/gone.mp3", b"gone audio", "\"g\"");

        client.set_feed(both.clone());
        run(&client, dir.path(), &mirror_options()).await;

        let store = EpisodeStore::load(dir.path()).unwrap();
        let gone_filename = store
            .get("https://cdn.test/gone.mp3")
            .unwrap()
            .filename
            .clone();
        let original_bytes = std::fs::read(dir.path().join(&gone_filename)).unwrap();

        // Episode disappears from the feed
        client.set_feed(only_keeper);
        let result = run(&client, dir.path(), &mirror_options()).await;
        assert_eq!(result.downloads_count, 0);

        let deleted_dir = quarantine_dir(dir.path());
        assert!(!dir.path().join(&gone_filename).exists());
        assert!(deleted_dir.join(&gone_filename).exists());
        let store = EpisodeStore::load(dir.path()).unwrap();
        assert!(store.get("https://cdn.test/gone.mp3").unwrap().deleted);

        // Quarantined episodes stay in the output feed
        let output = std::fs::read_to_string(dir.path().join(OUTPUT_FEED_FILENAME)).unwrap();
        assert!(output.contains("DELETED UPSTREAM: Vanisher"));
        assert!(output.contains("deleted/"));

        // Episode reappears
        client.set_feed(both);
        let result = run(&client, dir.path(), &mirror_options()).await;
        assert_eq!(result.downloads_count, 0);

        assert!(dir.path().join(&gone_filename).exists());
        assert!(!deleted_dir.join(&gone_filename).exists());
        assert_eq!(
            std::fs::read(dir.path().join(&gone_filename)).unwrap(),
            original_bytes
        );

        let store = EpisodeStore::load(dir.path()).unwrap();
        let record = store.get("https://cdn.test/gone.mp3").unwrap();
        assert!(!record.deleted);
        // The whole cycle added no version entries
        assert_eq!(record.versions.len(), 1);
    }

    #[tokio::test]
    async fn changed_content_is_archived_and_versioned() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"first cut", "\"v1\"");

        run(&client, dir.path(), &mirror_options()).await;

        // Remote replaces the file with a longer cut
        client.set_resource("https://cdn.test/ep1.mp3", b"extended directors cut", "\"v2\"");
        let result = run(&client, dir.path(), &mirror_options()).await;
        assert_eq!(result.downloads_count, 1);

        let (_, record) = single_record(dir.path());
        assert_eq!(
            std::fs::read(dir.path().join(&record.filename)).unwrap(),
            b"extended directors cut"
        );

        // Old content survives under a timestamped name
        let archived: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(&record.filename) && n.contains(".pre-"))
            .collect();
        assert_eq!(archived.len(), 1);
        assert_eq!(
            std::fs::read(dir.path().join(&archived[0])).unwrap(),
            b"first cut"
        );

        // Initial current + archived content + new current
        assert_eq!(record.versions.len(), 3);
        let current: Vec<_> = record.versions.iter().filter(|v| v.is_current).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].reason, "Updated content");
        assert!(
            record
                .versions
                .iter()
                .any(|v| v.kind == VersionKind::Content && !v.is_current)
        );
    }

    #[tokio::test]
    async fn changed_etag_with_identical_content_leaves_file_alone() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"same audio", "\"v1\"");

        run(&client, dir.path(), &mirror_options()).await;

        // Same bytes behind a new validator (CDN rotation)
        client.set_resource("https://cdn.test/ep1.mp3", b"same audio", "\"v2\"");
        let result = run(&client, dir.path(), &mirror_options()).await;

        // Verification fetched the body but found identical content
        assert_eq!(result.downloads_count, 1);
        let (_, record) = single_record(dir.path());
        assert_eq!(record.versions.len(), 1);
        let archived = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".pre-"));
        assert!(!archived);

        // The new validator was remembered; a third run fetches nothing
        let streams = client.stream_calls();
        let result = run(&client, dir.path(), &mirror_options()).await;
        assert_eq!(result.downloads_count, 0);
        assert_eq!(client.stream_calls(), streams);
    }

    #[tokio::test]
    async fn metadata_change_archives_sidecar_and_updates_record() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Working Title",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio", "\"e1\"");

        run(&client, dir.path(), &mirror_options()).await;

        // Title edited upstream; enclosure URL and content unchanged
        client.set_feed(feed_with(&[(
            "Final Title",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        let reporter = CollectingReporter::default();
        let result = sync_feed(&client, FEED_URL, dir.path(), &mirror_options(), &reporter)
            .await
            .unwrap();
        assert_eq!(result.downloads_count, 0);

        let (_, record) = single_record(dir.path());
        assert_eq!(record.title, "Final Title");

        // Old sidecar archived, metadata version appended, new current entry
        assert!(
            std::fs::read_dir(dir.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .any(|e| {
                    let name = e.file_name().to_string_lossy().into_owned();
                    name.contains(".json.pre-")
                })
        );
        assert!(
            record
                .versions
                .iter()
                .any(|v| v.kind == VersionKind::Metadata)
        );
        let current: Vec<_> = record.versions.iter().filter(|v| v.is_current).collect();
        assert_eq!(current.len(), 1);

        let store = EpisodeStore::load(dir.path()).unwrap();
        let sidecar = store.load_sidecar(&record.filename).unwrap().unwrap();
        assert_eq!(sidecar.title, "Final Title");

        let events = reporter.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::TitleChanged { .. } | SyncEvent::MetadataChanged { .. }
        )));
    }

    #[tokio::test]
    async fn missing_local_file_is_downloaded_again() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio one", "\"e1\"");

        run(&client, dir.path(), &mirror_options()).await;

        let (_, record) = single_record(dir.path());
        std::fs::remove_file(dir.path().join(&record.filename)).unwrap();

        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.downloads_count, 1);
        assert!(dir.path().join(&record.filename).exists());
    }

    #[tokio::test]
    async fn entries_without_enclosure_are_not_recorded() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Mock Show</title>
    <description>Test</description>
    <link>https://example.com</link>
    <item>
      <title>Announcement</title>
      <description>Text only</description>
    </item>
    <item>
      <title>Real Episode</title>
      <pubDate>{PUB_DATE}</pubDate>
      <enclosure url="https://cdn.test/ep.mp3" length="0" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#
        ));
        client.set_resource("https://cdn.test/ep.mp3", b"audio", "\"e\"");

        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.total_entries, 2);
        assert_eq!(result.downloads_count, 1);
        let store = EpisodeStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_download_skips_entry_without_aborting_run() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[
            ("Broken", "https://cdn.test/broken.mp3", PUB_DATE),
            ("Working", "https://cdn.test/works.mp3", PUB_DATE),
        ]));
        // broken.mp3 has no resource registered and returns 404
        client.set_resource("https://cdn.test/works.mp3", b"fine audio", "\"w\"");

        let result = run(&client, dir.path(), &mirror_options()).await;

        assert_eq!(result.downloads_count, 1);
        let store = EpisodeStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(!store.get("https://cdn.test/broken.mp3").unwrap().downloaded);
        assert!(store.get("https://cdn.test/works.mp3").unwrap().downloaded);

        // The failed entry is flagged in the output feed and stays pending
        let output = std::fs::read_to_string(dir.path().join(OUTPUT_FEED_FILENAME)).unwrap();
        assert!(output.contains("NOT BACKED UP: Broken"));
    }

    #[tokio::test]
    async fn leftover_partial_files_are_cleaned_up() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio", "\"e\"");

        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("stale.mp3.part"), b"interrupted").unwrap();

        let reporter = CollectingReporter::default();
        sync_feed(&client, FEED_URL, dir.path(), &mirror_options(), &reporter)
            .await
            .unwrap();

        assert!(!dir.path().join("stale.mp3.part").exists());
        let events = reporter.events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, SyncEvent::PartialFilesCleaned { count: 1 }))
        );
    }

    #[tokio::test]
    async fn output_feed_points_at_the_mirror() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio", "\"e\"");

        run(&client, dir.path(), &mirror_options()).await;

        let (_, record) = single_record(dir.path());
        let output = std::fs::read_to_string(dir.path().join(OUTPUT_FEED_FILENAME)).unwrap();
        assert!(output.contains(&format!("https://mirror.test/pod/{}", record.filename)));
        assert!(!output.contains("https://cdn.test/ep1.mp3"));
        assert!(output.contains("Mock Show podcast-backup"));
    }

    #[tokio::test]
    async fn lost_sidecar_is_rebuilt_from_the_live_file() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio one", "\"e1\"");

        run(&client, dir.path(), &mirror_options()).await;

        let (_, record) = single_record(dir.path());
        std::fs::remove_file(dir.path().join(format!("{}.json", record.filename))).unwrap();

        let result = run(&client, dir.path(), &mirror_options()).await;

        // Rebuilt without fetching the body again
        assert_eq!(result.downloads_count, 0);
        let store = EpisodeStore::load(dir.path()).unwrap();
        let sidecar = store.load_sidecar(&record.filename).unwrap().unwrap();
        assert_eq!(sidecar.etag, Some("\"e1\"".to_string()));
        assert!(sidecar.content_hash.is_some());
    }

    #[tokio::test]
    async fn filename_is_stable_across_runs() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::default();
        client.set_feed(feed_with(&[(
            "Episode One",
            "https://cdn.test/ep1.mp3",
            PUB_DATE,
        )]));
        client.set_resource("https://cdn.test/ep1.mp3", b"audio", "\"e\"");

        run(&client, dir.path(), &mirror_options()).await;
        let (_, first) = single_record(dir.path());

        run(&client, dir.path(), &mirror_options()).await;
        let (_, second) = single_record(dir.path());

        assert_eq!(first.filename, second.filename);
        assert!(first.filename.starts_with("2024-01-15-"));
    }
}
