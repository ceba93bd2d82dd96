pub mod download;
pub mod filename;

pub use download::{DownloadOutcome, cleanup_partial_files, download_enclosure};
pub use filename::{generate_filename, media_extension};
