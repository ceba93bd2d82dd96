use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::ArchiveError;

/// A file that was relocated to a timestamped archival name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archived {
    /// Full path of the archived file
    pub path: PathBuf,
    /// File name (without directory) of the archived file
    pub archived_file: String,
    /// Timestamp embedded in the archival name
    pub timestamp: String,
}

/// Atomically rename `path` to `path.pre-<timestamp>` before it is overwritten.
///
/// Returns `Ok(None)` if `path` does not exist. Timestamp granularity is one
/// second; repeated sub-second archives of the same path can collide.
///
/// This must be called, and must succeed, before any write that would destroy
/// prior content.
pub fn archive(path: &Path) -> Result<Option<Archived>, ArchiveError> {
    if !path.exists() {
        return Ok(None);
    }

    let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();

    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".pre-{timestamp}"));
    let archived_path = PathBuf::from(name);

    std::fs::rename(path, &archived_path).map_err(|e| ArchiveError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let archived_file = archived_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Some(Archived {
        path: archived_path,
        archived_file,
        timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archive_renames_with_pre_suffix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3");
        std::fs::write(&path, b"old content").unwrap();

        let archived = archive(&path).unwrap().unwrap();

        assert!(!path.exists());
        assert!(archived.path.exists());
        assert!(archived.archived_file.starts_with("episode.mp3.pre-"));
        assert_eq!(std::fs::read(&archived.path).unwrap(), b"old content");
    }

    #[test]
    fn archive_preserves_full_filename_including_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("episode.mp3.json");
        std::fs::write(&path, b"{}").unwrap();

        let archived = archive(&path).unwrap().unwrap();
        assert!(archived.archived_file.starts_with("episode.mp3.json.pre-"));
    }

    #[test]
    fn absent_file_is_a_noop() {
        let dir = tempdir().unwrap();
        let result = archive(&dir.path().join("missing.mp3")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn archived_name_embeds_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"x").unwrap();

        let archived = archive(&path).unwrap().unwrap();
        assert_eq!(
            archived.archived_file,
            format!("a.mp3.pre-{}", archived.timestamp)
        );
    }
}
