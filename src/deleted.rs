use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::RelocateError;
use crate::progress::{Reporter, SyncEvent};
use crate::store::EpisodeStore;

/// Name of the quarantine directory inside a storage directory
pub const QUARANTINE_DIR: &str = "deleted";

/// Quarantine location for a storage directory
pub fn quarantine_dir(storage_dir: &Path) -> PathBuf {
    storage_dir.join(QUARANTINE_DIR)
}

/// All files belonging to an episode's filename: the file itself, its
/// sidecars, and every archived `.pre-` variant of any of them. Partial
/// moves would orphan version history, so the family is always planned as
/// one unit.
fn plan_family_moves(
    from_dir: &Path,
    to_dir: &Path,
    filename: &str,
) -> Result<Vec<(PathBuf, PathBuf)>, RelocateError> {
    let mut names = vec![filename.to_string()];

    for sidecar in [format!("{filename}.json"), format!("{filename}.rss.xml")] {
        if from_dir.join(&sidecar).exists() {
            names.push(sidecar);
        }
    }

    let entries = std::fs::read_dir(from_dir).map_err(|e| RelocateError::ScanFailed {
        path: from_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| RelocateError::ScanFailed {
            path: from_dir.to_path_buf(),
            source: e,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(filename) && name.contains(".pre-") {
            names.push(name);
        }
    }

    Ok(names
        .into_iter()
        .map(|name| (from_dir.join(&name), to_dir.join(&name)))
        .collect())
}

/// Apply planned moves all-or-nothing: on a failed rename, completed moves
/// are rolled back with compensating renames before the error is returned.
fn apply_moves(moves: &[(PathBuf, PathBuf)]) -> Result<(), RelocateError> {
    for (i, (from, to)) in moves.iter().enumerate() {
        if let Err(e) = std::fs::rename(from, to) {
            for (from, to) in moves[..i].iter().rev() {
                let _ = std::fs::rename(to, from);
            }
            return Err(RelocateError::MoveFailed {
                from: from.clone(),
                to: to.clone(),
                source: e,
            });
        }
    }
    Ok(())
}

/// Move an episode's file family into quarantine.
///
/// Returns `Ok(false)` without side effects when the primary file does not
/// exist (never-downloaded episodes have nothing to quarantine).
pub fn move_to_deleted(
    storage_dir: &Path,
    deleted_dir: &Path,
    filename: &str,
) -> Result<bool, RelocateError> {
    if !storage_dir.join(filename).exists() {
        return Ok(false);
    }

    // Quarantine directory is created lazily, only when first needed
    std::fs::create_dir_all(deleted_dir).map_err(|e| RelocateError::CreateDirectoryFailed {
        path: deleted_dir.to_path_buf(),
        source: e,
    })?;

    let moves = plan_family_moves(storage_dir, deleted_dir, filename)?;
    apply_moves(&moves)?;
    Ok(true)
}

/// Move an episode's file family back from quarantine into active storage.
///
/// Returns `Ok(false)` when nothing is quarantined under that filename.
pub fn restore_from_deleted(
    storage_dir: &Path,
    deleted_dir: &Path,
    filename: &str,
) -> Result<bool, RelocateError> {
    if !deleted_dir.join(filename).exists() {
        return Ok(false);
    }

    let moves = plan_family_moves(deleted_dir, storage_dir, filename)?;
    apply_moves(&moves)?;
    Ok(true)
}

/// Quarantine every stored episode whose identifier disappeared from the
/// current feed. The flag is only set when a file was actually moved, so
/// never-downloaded records keep retrying on later runs.
pub fn reconcile(
    store: &mut EpisodeStore,
    live_identifiers: &HashSet<String>,
    deleted_dir: &Path,
    reporter: &dyn Reporter,
) -> Result<(), RelocateError> {
    let storage_dir = store.storage_dir().to_path_buf();
    for (identifier, record) in store.iter_mut() {
        if live_identifiers.contains(identifier) || record.deleted {
            continue;
        }

        if move_to_deleted(&storage_dir, deleted_dir, &record.filename)? {
            record.deleted = true;
            reporter.report(SyncEvent::EpisodeDeleted {
                title: record.title.clone(),
            });
        }
    }
    Ok(())
}
