//! Content hashing for layer artifacts.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Streams `path` through SHA-256 and returns the lowercase hex digest.
pub fn compute_content_hash(path: &Path) -> std::io::Result<String> {
    let _span = tracing::trace_span!("compute_content_hash", path = %path.display()).entered();
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    let digest = hex::encode(hasher.finalize());
    tracing::debug!(path = %path.display(), bytes = total, hash = %digest, "Computed content hash");
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.zip");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            compute_content_hash(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_is_deterministic_and_byte_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layer.zip");
        // Larger than one chunk so the streaming path is exercised.
        let mut bytes: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &bytes).unwrap();

        let first = compute_content_hash(&path).unwrap();
        let second = compute_content_hash(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);

        bytes[CHUNK_SIZE + 5] ^= 0x01;
        fs::write(&path, &bytes).unwrap();
        assert_ne!(compute_content_hash(&path).unwrap(), first);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(compute_content_hash(&dir.path().join("nope.zip")).is_err());
    }
}
