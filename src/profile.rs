// src/profile.rs

//! Build profiles
//!
//! A profile names the backing image to build against and the repository
//! policy to apply inside the container: which preconfigured repos to
//! remove, which to add, and any local directory repos to bind-mount in.
//! Profiles are `<name>.profile` TOML files in the same stateless search
//! paths as the global configuration.

use crate::config::CONFIG_PATHS;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Suffix for profile definition files
pub const PROFILE_SUFFIX: &str = ".profile";

/// Wildcard accepted in `remove_repos` / `add_repos`
pub const REPO_WILDCARD: &str = "*";

/// A single repository declaration within a profile
#[derive(Debug, Clone, Deserialize)]
pub struct Repo {
    /// Remote index URI, or a local directory path when `local` is set
    pub uri: String,
    /// Whether this repo is a directory on the host to bind-mount
    #[serde(default)]
    pub local: bool,
    /// Whether to (re)index the local repo before adding it
    #[serde(default)]
    pub autoindex: bool,
}

/// A Profile is a configuration defining what backing image to use and
/// what repositories to work with.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    /// Name of this profile, set by file name, not TOML
    #[serde(skip)]
    pub name: String,
    /// The backing image for this profile
    pub image: String,
    /// Repositories to remove before adding our own; `["*"]` removes all
    #[serde(default)]
    pub remove_repos: Vec<String>,
    /// Declared repositories, by name
    #[serde(default, rename = "repo")]
    pub repos: BTreeMap<String, Repo>,
    /// Subset of `repos` to enable; empty or `["*"]` enables all
    #[serde(default)]
    pub add_repos: Vec<String>,
}

impl Profile {
    /// Load the named profile from the system paths
    pub fn load(name: &str) -> Result<Self> {
        Self::load_from(name, CONFIG_PATHS)
    }

    /// Load the named profile from explicit directories; the last directory
    /// containing `<name>.profile` wins.
    pub fn load_from<P: AsRef<Path>>(name: &str, paths: &[P]) -> Result<Self> {
        let mut found: Option<Profile> = None;
        for dir in paths {
            let path = dir.as_ref().join(format!("{name}{PROFILE_SUFFIX}"));
            if !path.exists() {
                continue;
            }
            let contents = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            let mut profile: Profile = toml::from_str(&contents)?;
            profile.name = name.to_string();
            profile.validate()?;
            found = Some(profile);
        }
        found.ok_or_else(|| Error::InvalidProfile(name.to_string()))
    }

    /// Check internal consistency: every explicit `add_repos` entry must be
    /// declared, unless the list is exactly the wildcard.
    pub fn validate(&self) -> Result<()> {
        if self.add_repos.len() == 1 && self.add_repos[0] == REPO_WILDCARD {
            return Ok(());
        }
        for id in &self.add_repos {
            if !self.repos.contains_key(id) {
                return Err(Error::InvalidProfile(format!(
                    "{}: add_repos references undeclared repo '{id}'",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSTABLE: &str = r#"
image = "main-x86_64"
remove_repos = ["*"]
add_repos = ["Solus"]

[repo.Solus]
uri = "https://mirrors.example.com/eopkg-index.xml.xz"

[repo.Local]
uri = "/var/lib/myrepo"
local = true
autoindex = true
"#;

    #[test]
    fn test_load_profile() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("unstable-x86_64.profile"), UNSTABLE).unwrap();

        let profile = Profile::load_from("unstable-x86_64", &[dir.path()]).unwrap();
        assert_eq!(profile.name, "unstable-x86_64");
        assert_eq!(profile.image, "main-x86_64");
        assert_eq!(profile.remove_repos, vec!["*"]);
        assert_eq!(profile.add_repos, vec!["Solus"]);
        assert_eq!(profile.repos.len(), 2);
        assert!(profile.repos["Local"].local);
        assert!(profile.repos["Local"].autoindex);
        assert!(!profile.repos["Solus"].local);
    }

    #[test]
    fn test_unknown_profile() {
        let dir = tempfile::tempdir().unwrap();
        match Profile::load_from("missing", &[dir.path()]) {
            Err(Error::InvalidProfile(name)) => assert_eq!(name, "missing"),
            other => panic!("expected InvalidProfile, got {other:?}"),
        }
    }

    #[test]
    fn test_add_repos_must_be_declared() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("broken.profile"),
            "image = \"main-x86_64\"\nadd_repos = [\"Ghost\"]\n",
        )
        .unwrap();
        assert!(Profile::load_from("broken", &[dir.path()]).is_err());
    }

    #[test]
    fn test_add_repos_wildcard_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("wild.profile"),
            "image = \"main-x86_64\"\nadd_repos = [\"*\"]\n",
        )
        .unwrap();
        let profile = Profile::load_from("wild", &[dir.path()]).unwrap();
        assert_eq!(profile.add_repos, vec!["*"]);
    }

    #[test]
    fn test_later_directory_shadows() {
        let vendor = tempfile::tempdir().unwrap();
        let admin = tempfile::tempdir().unwrap();
        fs::write(
            vendor.path().join("main-x86_64.profile"),
            "image = \"vendor-image\"\n",
        )
        .unwrap();
        fs::write(
            admin.path().join("main-x86_64.profile"),
            "image = \"admin-image\"\n",
        )
        .unwrap();

        let profile =
            Profile::load_from("main-x86_64", &[vendor.path(), admin.path()]).unwrap();
        assert_eq!(profile.image, "admin-image");
    }
}
