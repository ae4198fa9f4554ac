// src/hash.rs

//! File digest helpers for source and artifact validation
//!
//! Two algorithms are in play:
//! - **SHA-256**: the validator for modern (`package.yml`) sources, the
//!   source-cache directory key, and transit-manifest checksums
//! - **SHA-1**: only used to validate legacy (`pspec.xml`) archives; cached
//!   files gain a SHA-1 symlink sibling so legacy validators resolve
//!
//! Digests are streamed so multi-gigabyte tarballs don't get slurped.

use crate::error::{Error, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const READ_CHUNK: usize = 128 * 1024;

fn stream_digest<D: Digest>(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(path, e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the hex SHA-256 digest of the file at `path`
pub fn sha256_file(path: &Path) -> Result<String> {
    stream_digest::<Sha256>(path)
}

/// Compute the hex SHA-1 digest of the file at `path`
pub fn sha1_file(path: &Path) -> Result<String> {
    stream_digest::<Sha1>(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"abc").unwrap();
        drop(f);

        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha1_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"abc").unwrap();
        drop(f);

        assert_eq!(
            sha1_file(&path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = sha256_file(Path::new("/nonexistent/file")).unwrap_err();
        match err {
            Error::Io { path, .. } => assert_eq!(path, Path::new("/nonexistent/file")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
