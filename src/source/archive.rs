// src/source/archive.rs

//! Digest-validated archive sources
//!
//! Archives are fetched with curl into a staging directory, validated,
//! then promoted into the cache keyed by SHA-256 digest:
//! `/var/lib/solbuild/sources/<sha256>/<basename>`. Legacy recipes only
//! carry SHA-1 digests, so promotion additionally drops a SHA-1 symlink
//! next to the SHA-256 directory for their validators to resolve.

use super::{BindPair, SOURCE_DIR, SOURCE_STAGING_DIR};
use crate::error::{Error, Result};
use crate::hash;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp", "ftps"];

/// A tarball or other fetchable file source
#[derive(Debug, Clone)]
pub struct ArchiveSource {
    /// Upstream location
    pub uri: String,
    /// Basename of the cached file
    pub file: String,
    /// Validating digest: SHA-256 for modern recipes, SHA-1 for legacy
    pub digest: String,
    /// Whether the digest is a legacy SHA-1
    pub legacy: bool,
}

impl ArchiveSource {
    pub fn new(uri: &str, digest: &str, legacy: bool) -> Result<Self> {
        let parsed = url::Url::parse(uri)
            .map_err(|_| Error::UnsupportedSourceScheme(uri.to_string()))?;
        if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
            return Err(Error::UnsupportedSourceScheme(uri.to_string()));
        }
        let file = Path::new(parsed.path())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::UnsupportedSourceScheme(uri.to_string()))?;

        Ok(Self {
            uri: uri.to_string(),
            file,
            digest: digest.to_string(),
            legacy,
        })
    }

    /// Cache location for this archive, keyed on the validating digest.
    ///
    /// For legacy sources the digest component is a SHA-1 symlink created
    /// at promotion time, pointing at the real SHA-256 directory.
    pub fn path(&self) -> PathBuf {
        Path::new(SOURCE_DIR).join(&self.digest).join(&self.file)
    }

    pub fn is_fetched(&self) -> bool {
        self.path().exists()
    }

    /// Download, validate and promote the archive into the cache
    pub fn fetch(&self) -> Result<()> {
        let staging = Path::new(SOURCE_STAGING_DIR);
        fs::create_dir_all(staging).map_err(|e| Error::io(staging, e))?;
        let staged = staging.join(&self.file);

        info!(uri = %self.uri, "fetching source");
        let status = Command::new("curl")
            .arg("-L")
            .arg("-o")
            .arg(&staged)
            .arg("--progress-bar")
            .arg(&self.uri)
            .status()
            .map_err(|e| Error::io(&staged, e))?;
        if !status.success() {
            return Err(Error::ChildFailed {
                cmd: format!("curl {}", self.uri),
                status: status.code().unwrap_or(-1),
            });
        }

        self.verify(&staged)?;
        self.promote(&staged)
    }

    /// Check the staged download against the declared digest
    fn verify(&self, staged: &Path) -> Result<()> {
        let actual = if self.legacy {
            hash::sha1_file(staged)?
        } else {
            hash::sha256_file(staged)?
        };
        if actual != self.digest {
            return Err(Error::ChecksumMismatch {
                path: self.file.clone(),
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Move the verified download into `<sources>/<sha256>/` and, for
    /// legacy sources, plant the SHA-1 symlink sibling.
    fn promote(&self, staged: &Path) -> Result<()> {
        let sha256 = hash::sha256_file(staged)?;
        let target_dir = Path::new(SOURCE_DIR).join(&sha256);
        fs::create_dir_all(&target_dir).map_err(|e| Error::io(&target_dir, e))?;

        let dest = target_dir.join(&self.file);
        debug!(dest = %dest.display(), "promoting verified source");
        fs::rename(staged, &dest).map_err(|e| Error::io(&dest, e))?;

        if self.legacy {
            let sha1 = hash::sha1_file(&dest)?;
            let link = Path::new(SOURCE_DIR).join(&sha1);
            if !link.exists() {
                symlink(&sha256, &link).map_err(|e| Error::io(&link, e))?;
            }
        }
        Ok(())
    }

    pub fn bind_pair(&self, container_dir: &Path) -> BindPair {
        BindPair {
            host_path: self.path(),
            container_path: container_dir.join(&self.file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_odd_schemes() {
        assert!(matches!(
            ArchiveSource::new("gopher://example.com/a.tar", "ab", false),
            Err(Error::UnsupportedSourceScheme(_))
        ));
        assert!(matches!(
            ArchiveSource::new("not a uri at all", "ab", false),
            Err(Error::UnsupportedSourceScheme(_))
        ));
    }

    #[test]
    fn test_cache_path_keyed_on_digest() {
        let source =
            ArchiveSource::new("https://example.com/dl/nano-7.2.tar.xz", "cafe1234", false)
                .unwrap();
        assert_eq!(
            source.path(),
            Path::new("/var/lib/solbuild/sources/cafe1234/nano-7.2.tar.xz")
        );
    }

    #[test]
    fn test_bind_pair_targets_container_dir() {
        let source =
            ArchiveSource::new("https://example.com/nano-7.2.tar.xz", "cafe1234", false).unwrap();
        let pair = source.bind_pair(Path::new("/home/build/YPKG/sources"));
        assert_eq!(
            pair.container_path,
            Path::new("/home/build/YPKG/sources/nano-7.2.tar.xz")
        );
        assert_eq!(pair.host_path, source.path());
    }

    #[test]
    fn test_query_strings_do_not_leak_into_basename() {
        let source = ArchiveSource::new(
            "https://example.com/download/nano-7.2.tar.xz?mirror=3",
            "cafe",
            false,
        )
        .unwrap();
        assert_eq!(source.file, "nano-7.2.tar.xz");
    }
}
