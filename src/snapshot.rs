use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::MetadataError;
use crate::feed::Episode;

/// Build the feed item an entry would occupy, as it exists right now.
///
/// Used both for the per-file snapshot and when re-appending quarantined
/// episodes to the output feed.
pub fn episode_to_item(episode: &Episode) -> rss::Item {
    let mut item = rss::Item::default();
    item.set_title(episode.title.clone());
    item.set_description(episode.description.clone());
    item.set_link(episode.link.clone());
    item.set_pub_date(episode.published.clone());
    item.set_author(episode.author.clone());

    if let Some(enclosure) = &episode.enclosure {
        let mut enc = rss::Enclosure::default();
        enc.set_url(enclosure.url.to_string());
        enc.set_length(enclosure.length.map(|l| l.to_string()).unwrap_or_default());
        enc.set_mime_type(enclosure.mime_type.clone().unwrap_or_default());
        item.set_enclosure(enc);
    }

    item
}

fn snapshot_path(dir: &Path, filename: &str) -> PathBuf {
    dir.join(format!("{filename}.rss.xml"))
}

/// Write the `<filename>.rss.xml` snapshot capturing the entry's feed
/// presentation at download time.
///
/// Stored as a minimal single-item channel document so it can be read back
/// with the same parser.
pub fn write_snapshot(dir: &Path, filename: &str, episode: &Episode) -> Result<(), MetadataError> {
    let path = snapshot_path(dir, filename);

    let mut channel = rss::Channel::default();
    channel.set_items(vec![episode_to_item(episode)]);

    let file = File::create(&path).map_err(|e| MetadataError::WriteFailed {
        path: path.clone(),
        source: e,
    })?;

    channel
        .pretty_write_to(file, b' ', 2)
        .map(|_| ())
        .map_err(|e| MetadataError::SnapshotWriteFailed { path, source: e })
}

/// Read a snapshot back into its feed item, `None` if no snapshot exists
pub fn read_snapshot(dir: &Path, filename: &str) -> Result<Option<rss::Item>, MetadataError> {
    let path = snapshot_path(dir, filename);
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(&path).map_err(|e| MetadataError::ReadFailed {
        path: path.clone(),
        source: e,
    })?;

    let channel = rss::Channel::read_from(BufReader::new(file))
        .map_err(|e| MetadataError::SnapshotParseFailed { path, source: e })?;

    Ok(channel.into_items().into_iter().next())
}
