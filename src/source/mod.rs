// src/source/mod.rs

//! Package sources
//!
//! A recipe declares zero or more sources; each is either a fetchable
//! archive validated by digest, or a git checkout pinned to a ref. All
//! sources are cached host-side and bind mounted into the container at
//! stage time, so the build itself never talks to the network for them.
//!
//! The parser picks the variant at recipe-load time; from there on the
//! core only ever goes through the common [`Source`] surface.

mod archive;
mod git;

pub use archive::ArchiveSource;
pub use git::GitSource;

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Where we store all cached source archives
pub const SOURCE_DIR: &str = "/var/lib/solbuild/sources";

/// Where downloads land before they are verified and promoted
pub const SOURCE_STAGING_DIR: &str = "/var/lib/solbuild/sources/staging";

/// Base directory for all cached git sources
pub const GIT_SOURCE_DIR: &str = "/var/lib/solbuild/sources/git";

/// Prefix marking a ypkg source as a git checkout
pub const GIT_URI_PREFIX: &str = "git|";

/// A bind mount a source needs in order to appear inside the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPair {
    /// The locally cached artifact
    pub host_path: PathBuf,
    /// Target within the container filesystem
    pub container_path: PathBuf,
}

/// A source listed in a package spec file
#[derive(Debug, Clone)]
pub enum Source {
    Archive(ArchiveSource),
    Git(GitSource),
}

impl Source {
    /// Construct the right variant for a ypkg/pspec source declaration.
    ///
    /// `validator` is the SHA-256 digest for modern recipes, the SHA-1
    /// digest for legacy ones, or the ref for git sources.
    pub fn new(uri: &str, validator: &str, legacy: bool) -> Result<Self> {
        if let Some(git_uri) = uri.strip_prefix(GIT_URI_PREFIX) {
            return Ok(Self::Git(GitSource::new(git_uri, validator)?));
        }
        Ok(Self::Archive(ArchiveSource::new(uri, validator, legacy)?))
    }

    /// Short identifier for log messages
    pub fn identifier(&self) -> &str {
        match self {
            Self::Archive(a) => &a.file,
            Self::Git(g) => &g.base_name,
        }
    }

    /// Whether the cached artifact is already present
    pub fn is_fetched(&self) -> bool {
        match self {
            Self::Archive(a) => a.is_fetched(),
            Self::Git(g) => g.is_fetched(),
        }
    }

    /// Fetch and cache the source locally
    pub fn fetch(&self) -> Result<()> {
        match self {
            Self::Archive(a) => a.fetch(),
            Self::Git(g) => g.fetch(),
        }
    }

    /// The bind mount needed to expose this source below `container_dir`
    pub fn bind_pair(&self, container_dir: &Path) -> BindPair {
        match self {
            Self::Archive(a) => a.bind_pair(container_dir),
            Self::Git(g) => g.bind_pair(container_dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_dispatches_on_git_prefix() {
        let git = Source::new("git|https://github.com/example/nano", "v7.2", false).unwrap();
        assert!(matches!(git, Source::Git(_)));

        let archive = Source::new("https://example.com/nano-7.2.tar.xz", "ab12", false).unwrap();
        assert!(matches!(archive, Source::Archive(_)));
    }

    #[test]
    fn test_identifier_is_basename() {
        let source = Source::new("https://example.com/dl/nano-7.2.tar.xz", "ab12", false).unwrap();
        assert_eq!(source.identifier(), "nano-7.2.tar.xz");

        let git = Source::new("git|https://github.com/example/nano", "v7.2", false).unwrap();
        assert_eq!(git.identifier(), "nano.git");
    }
}
