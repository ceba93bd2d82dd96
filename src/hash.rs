use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const HASH_CHUNK_SIZE: usize = 8192;

/// Compute the SHA-256 hex digest of a file, streaming in fixed-size chunks.
///
/// Returns `Ok(None)` if the file does not exist.
pub async fn hash_file(path: &Path) -> std::io::Result<Option<String>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(Some(hex_digest(hasher)))
}

/// Finalize a SHA-256 hasher into a lowercase hex string
pub fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
