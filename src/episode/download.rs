use std::path::{Path, PathBuf};

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::archive::{self, Archived};
use crate::error::DownloadError;
use crate::hash::hex_digest;
use crate::http::HttpClient;
use crate::progress::{DownloadKind, Reporter, SyncEvent};

/// Suffix for in-flight downloads; anything carrying it is garbage on the
/// next run
const PART_SUFFIX: &str = ".part";

/// Result of fetching an enclosure body
#[derive(Debug)]
pub struct DownloadOutcome {
    /// False when the fetched bytes hash identically to the existing file;
    /// the temp copy was discarded and the original kept (preserving its
    /// timestamp)
    pub changed: bool,
    /// SHA-256 hex digest of the fetched bytes
    pub hash: String,
    /// Prior version archived before the new file was promoted, if any
    pub archived: Option<Archived>,
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Download an enclosure to `dest`, hashing the body en route.
///
/// The body is streamed to `dest.part` first. If `existing_hash` matches the
/// fetched content the temp file is discarded and the original kept. On a
/// real change the existing file is archived under a timestamped name before
/// the temp file is promoted, so prior content is never destroyed. Any
/// failure removes the temp file and aborts this entry's attempt.
pub async fn download_enclosure<C: HttpClient>(
    client: &C,
    url: &str,
    dest: &Path,
    existing_hash: Option<&str>,
    episode_title: &str,
    kind: DownloadKind,
    reporter: &dyn Reporter,
) -> Result<DownloadOutcome, DownloadError> {
    let temp = part_path(dest);

    let result = stream_to_temp(client, url, &temp, episode_title, kind, reporter).await;
    let hash = match result {
        Ok(hash) => hash,
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
    };

    if existing_hash == Some(hash.as_str()) {
        let _ = tokio::fs::remove_file(&temp).await;
        return Ok(DownloadOutcome {
            changed: false,
            hash,
            archived: None,
        });
    }

    // Archive before the rename below can destroy prior content
    let archived = match archive::archive(dest) {
        Ok(archived) => archived,
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(DownloadError::ArchiveFailed {
                path: e.path,
                source: e.source,
            });
        }
    };

    if let Some(archived) = &archived {
        reporter.report(SyncEvent::VersionArchived {
            archived_file: archived.archived_file.clone(),
        });
    }

    if let Err(e) = tokio::fs::rename(&temp, dest).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(DownloadError::PromoteFailed {
            path: dest.to_path_buf(),
            source: e,
        });
    }

    Ok(DownloadOutcome {
        changed: true,
        hash,
        archived,
    })
}

async fn stream_to_temp<C: HttpClient>(
    client: &C,
    url: &str,
    temp: &Path,
    episode_title: &str,
    kind: DownloadKind,
    reporter: &dyn Reporter,
) -> Result<String, DownloadError> {
    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    reporter.report(SyncEvent::DownloadStarting {
        episode_title: episode_title.to_string(),
        kind,
        content_length: response.content_length,
    });

    let mut file = File::create(temp)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: temp.to_path_buf(),
            source: e,
        })?;

    let mut hasher = Sha256::new();
    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: temp.to_path_buf(),
                source: e,
            })?;

        bytes_downloaded += chunk.len() as u64;
        reporter.report(SyncEvent::DownloadProgress {
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: temp.to_path_buf(),
            source: e,
        })?;

    reporter.report(SyncEvent::DownloadCompleted {
        episode_title: episode_title.to_string(),
        bytes_downloaded,
    });

    Ok(hex_digest(hasher))
}

/// Remove leftover `.part` files from an interrupted prior run.
///
/// Returns the number of files removed.
pub fn cleanup_partial_files(dir: &Path) -> std::io::Result<usize> {
    let mut cleaned = 0;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PART_SUFFIX));

        if is_part && std::fs::remove_file(&path).is_ok() {
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
