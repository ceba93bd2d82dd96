pub mod fetch;
pub mod parse;

pub use fetch::{fetch_feed_bytes, file_path_to_url, is_url, read_feed_file};
pub use parse::{Enclosure, Episode, Podcast, format_pub_date, parse_feed, parse_pub_date, today};
