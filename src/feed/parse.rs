// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, FixedOffset, Utc};
use url::Url;

use crate::error::FeedError;

/// Represents a parsed podcast feed
#[derive(Debug, Clone)]
pub struct Podcast {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<Url>,
    pub feed_url: Url,
    pub episodes: Vec<Episode>,
}

/// Represents a single feed entry.
///
/// `published` keeps the raw feed string so sidecars and snapshots can carry
/// it verbatim; use [`parse_pub_date`] when a point in time is needed.
#[derive(Debug, Clone)]
pub struct Episode {
    pub title: String,
    pub description: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
    pub enclosure: Option<Enclosure>,
}

impl Episode {
    /// The enclosure URL, serving as the episode's stable identifier
    pub fn identifier(&self) -> Option<&str> {
        self.enclosure.as_ref().map(|e| e.url.as_str())
    }
}

/// Represents the media file attached to an entry
#[derive(Debug, Clone)]
pub struct Enclosure {
    pub url: Url,
    pub length: Option<u64>,
    pub mime_type: Option<String>,
}

/// Parse RSS feed XML bytes into a Podcast struct.
///
/// Entries without an enclosure are kept; the sync engine skips them itself
/// so they still count toward the feed's entry order.
pub fn parse_feed(xml_bytes: &[u8], feed_url: Url) -> Result<Podcast, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let episodes = channel.items().iter().map(parse_episode).collect();

    Ok(Podcast {
        title: channel.title().to_string(),
        description: Some(channel.description().to_string()).filter(|s| !s.is_empty()),
        link: Url::parse(channel.link()).ok(),
        feed_url,
        episodes,
    })
}

fn parse_episode(item: &rss::Item) -> Episode {
    let enclosure = item.enclosure().and_then(|e| {
        Url::parse(e.url()).ok().map(|url| Enclosure {
            url,
            length: e.length().parse().ok(),
            mime_type: Some(e.mime_type().to_string()).filter(|s| !s.is_empty()),
        })
    });

    Episode {
        title: item
            .title()
            .map(String::from)
            .unwrap_or_else(|| "Untitled Episode".to_string()),
        description: item.description().map(String::from),
        link: item.link().map(String::from),
        author: item.author().map(String::from),
        published: item.pub_date().map(String::from),
        enclosure,
    }
}

/// Parse a feed publish date.
///
/// Accepts the two RFC-2822-like forms seen in the wild: a numeric offset, or
/// the literal `GMT` zone name (taken as UTC).
pub fn parse_pub_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_str(date_str, "%a, %d %b %Y %H:%M:%S %z") {
        return Some(dt);
    }

    chrono::NaiveDateTime::parse_from_str(date_str, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Format a feed publish date as `YYYY-MM-DD` for use in filenames.
///
/// Returns `None` if the string is absent or unparseable; callers fall back
/// to the run date.
pub fn format_pub_date(date_str: Option<&str>) -> Option<String> {
    let parsed = parse_pub_date(date_str?)?;
    Some(parsed.format("%Y-%m-%d").to_string())
}

/// Today's date in `YYYY-MM-DD` form, the fallback for undated entries
pub fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
