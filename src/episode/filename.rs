use sha2::{Digest, Sha256};

use crate::feed::{Enclosure, Episode, format_pub_date, today};
use crate::hash::hex_digest;

/// Hex characters of the title+date digest kept in the filename
const IDENTIFIER_LEN: usize = 16;

/// Generate the stable local filename for a feed entry.
///
/// Format: `YYYY-MM-DD-<id>.<ext>` where the date is the publish date (run
/// date when absent or unparseable) and the identifier is derived from the
/// title and that date. The same (title, parseable publish date) pair always
/// yields a byte-identical name, so metadata can be written before the
/// download completes and without consulting the record store.
pub fn generate_filename(episode: &Episode) -> String {
    let date = format_pub_date(episode.published.as_deref()).unwrap_or_else(today);
    let id = stable_identifier(&episode.title, &date);
    let ext = media_extension(episode.enclosure.as_ref());
    format!("{date}-{id}.{ext}")
}

fn stable_identifier(title: &str, date: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{title}:{date}").as_bytes());
    let mut digest = hex_digest(hasher);
    digest.truncate(IDENTIFIER_LEN);
    digest
}

/// Get the media file extension from an entry's enclosure.
///
/// Attempts to extract from the URL path or MIME type, defaults to "mp3".
pub fn media_extension(enclosure: Option<&Enclosure>) -> String {
    let Some(enclosure) = enclosure else {
        return "mp3".to_string();
    };

    if let Some(ext) = enclosure
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|filename| filename.rsplit('.').next())
        .filter(|ext| is_valid_audio_extension(ext))
    {
        return ext.to_lowercase();
    }

    if let Some(ref mime) = enclosure.mime_type
        && let Some(ext) = mime_to_extension(mime)
    {
        return ext.to_string();
    }

    "mp3".to_string()
}

fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}

fn mime_to_extension(mime: &str) -> Option<&'static str> {
    match mime.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}
