// src/source/git.rs

//! Git checkout sources
//!
//! A git source must carry a valid ref to check out. We keep one bare
//! mirror per upstream under the git cache, shaped after the upstream
//! URI: `/var/lib/solbuild/sources/git/<host>/<path>/<repo>.git`. The
//! container is handed the mirror read-only; the in-container tooling
//! performs its own local clone from it.

use super::{BindPair, GIT_SOURCE_DIR};
use crate::error::{Error, Result};
use git2::build::RepoBuilder;
use git2::Repository;
use std::path::{Path, PathBuf};
use tracing::info;

/// A git source as referenced by a ypkg build spec
#[derive(Debug, Clone)]
pub struct GitSource {
    /// Upstream URI, without the `git|` marker
    pub uri: String,
    /// Branch, tag or commit id to make available
    pub ref_id: String,
    /// Directory basename of the mirror, always `.git` suffixed
    pub base_name: String,
    /// Where the mirror lives on the host
    pub clone_path: PathBuf,
}

impl GitSource {
    pub fn new(uri: &str, ref_id: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(uri).map_err(|_| Error::UnsupportedSourceScheme(uri.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::UnsupportedSourceScheme(uri.to_string()))?;

        let upstream_path = Path::new(parsed.path());
        let mut base_name = upstream_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::UnsupportedSourceScheme(uri.to_string()))?;
        if !base_name.ends_with(".git") {
            base_name.push_str(".git");
        }

        let parent = upstream_path
            .parent()
            .map(|p| p.strip_prefix("/").unwrap_or(p).to_path_buf())
            .unwrap_or_default();
        let clone_path = Path::new(GIT_SOURCE_DIR)
            .join(host)
            .join(parent)
            .join(&base_name);

        Ok(Self {
            uri: uri.to_string(),
            ref_id: ref_id.to_string(),
            base_name,
            clone_path,
        })
    }

    pub fn is_fetched(&self) -> bool {
        // A mirror on disk isn't enough; the pinned ref must resolve in it
        match Repository::open(&self.clone_path) {
            Ok(repo) => self.resolve(&repo).is_some(),
            Err(_) => false,
        }
    }

    /// Mirror (or refresh) the upstream repository into the cache
    pub fn fetch(&self) -> Result<()> {
        let repo = match Repository::open(&self.clone_path) {
            Ok(repo) => {
                info!(uri = %self.uri, "git fetching existing clone");
                {
                    let mut remote = repo.find_remote("origin")?;
                    remote.fetch(&[] as &[&str], None, None)?;
                }
                repo
            }
            Err(_) => {
                info!(uri = %self.uri, "cloning git source");
                RepoBuilder::new()
                    .bare(true)
                    .clone(&self.uri, &self.clone_path)?
            }
        };

        if self.resolve(&repo).is_none() {
            return Err(Error::MalformedRecipe {
                path: self.clone_path.clone(),
                reason: format!("git ref '{}' not found in {}", self.ref_id, self.uri),
            });
        }
        Ok(())
    }

    /// Resolve the pinned ref to a commit id: branch, tag or raw oid
    fn resolve(&self, repo: &Repository) -> Option<String> {
        for candidate in [
            self.ref_id.clone(),
            format!("refs/tags/{}", self.ref_id),
            format!("refs/remotes/origin/{}", self.ref_id),
        ] {
            if let Ok(object) = repo.revparse_single(&candidate) {
                if let Ok(commit) = object.peel_to_commit() {
                    return Some(commit.id().to_string());
                }
            }
        }
        None
    }

    pub fn bind_pair(&self, container_dir: &Path) -> BindPair {
        BindPair {
            host_path: self.clone_path.clone(),
            container_path: container_dir.join(&self.base_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_path_mirrors_upstream_shape() {
        let source = GitSource::new("https://github.com/solus/nano", "v7.2").unwrap();
        assert_eq!(source.base_name, "nano.git");
        assert_eq!(
            source.clone_path,
            Path::new("/var/lib/solbuild/sources/git/github.com/solus/nano.git")
        );
    }

    #[test]
    fn test_git_suffix_not_doubled() {
        let source = GitSource::new("https://git.example.com/deep/tree/repo.git", "main").unwrap();
        assert_eq!(source.base_name, "repo.git");
        assert_eq!(
            source.clone_path,
            Path::new("/var/lib/solbuild/sources/git/git.example.com/deep/tree/repo.git")
        );
    }

    #[test]
    fn test_rejects_hostless_uri() {
        assert!(GitSource::new("file:///local/repo", "main").is_err());
    }

    #[test]
    fn test_bind_pair() {
        let source = GitSource::new("https://github.com/solus/nano", "v7.2").unwrap();
        let pair = source.bind_pair(Path::new("/home/build/YPKG/sources"));
        assert_eq!(
            pair.container_path,
            Path::new("/home/build/YPKG/sources/nano.git")
        );
    }
}
