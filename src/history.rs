// src/history.rs

//! Automatic changelog generation for ypkg builds
//!
//! Instead of dedicated changelog files, the history of a package is
//! derived from the git tags of the repository holding its `package.yml`.
//! For each tag we read the package.yml as it existed at that commit and
//! pair the version/release it declared with the commit author and date.
//! The result is serialized to a `history.xml` that `ypkg-build` consumes
//! inside the container to emit the package changelog.

use crate::error::{Error, Result};
use crate::recipe::Recipe;
use chrono::DateTime;
use git2::{ObjectType, Repository};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// The absolute maximum number of entries we'll provide changelog
/// entries for.
pub const MAX_CHANGELOG_ENTRIES: usize = 10;

/// File name ypkg-build expects inside the work directory
pub const HISTORY_FILE: &str = "history.xml";

/// A point in history parsed from one git tag
#[derive(Debug, Clone, Serialize)]
#[serde(rename = "Update")]
pub struct PackageUpdate {
    #[serde(rename = "@release")]
    pub release: u64,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Comment")]
    pub comment: String,
    #[serde(rename = "Name")]
    pub author: String,
    #[serde(rename = "Email")]
    pub author_email: String,
    /// Commit time in seconds since the epoch, for reproducible builds
    #[serde(skip)]
    pub timestamp: i64,
}

/// The changelog of a package, newest entry first
#[derive(Debug, Default, Serialize)]
#[serde(rename = "PackageHistory")]
pub struct PackageHistory {
    #[serde(rename = "Update")]
    pub updates: Vec<PackageUpdate>,
}

impl PackageHistory {
    /// Analyze the git history around `recipe_path`.
    ///
    /// Returns `None` when the recipe doesn't live in a git repository or
    /// the repository carries no usable tags; a build without history is
    /// perfectly fine.
    pub fn discover(recipe_path: &Path) -> Result<Option<Self>> {
        let dir = recipe_path.parent().unwrap_or_else(|| Path::new("."));
        let repo = match Repository::discover(dir) {
            Ok(repo) => repo,
            Err(_) => {
                debug!(dir = %dir.display(), "recipe not in a git repository, skipping history");
                return Ok(None);
            }
        };

        let recipe_name = recipe_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package.yml".to_string());

        let mut tags: Vec<String> = Vec::new();
        repo.tag_foreach(|_, name| {
            if let Ok(name) = std::str::from_utf8(name) {
                tags.push(name.to_string());
            }
            true
        })?;
        // Newest tags first, matching a reverse refname sort
        tags.sort();
        tags.reverse();

        let mut updates = Vec::new();
        for tag in &tags {
            if updates.len() >= MAX_CHANGELOG_ENTRIES {
                break;
            }
            match Self::update_for_tag(&repo, tag, &recipe_name) {
                Ok(Some(update)) => updates.push(update),
                // Malformed packages do happen mid-history
                Ok(None) => debug!(tag, "no usable recipe at tag, skipping"),
                Err(e) => debug!(tag, error = %e, "unreadable tag, skipping"),
            }
        }

        if updates.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self { updates }))
    }

    fn update_for_tag(
        repo: &Repository,
        tag: &str,
        recipe_name: &str,
    ) -> Result<Option<PackageUpdate>> {
        let object = repo.revparse_single(tag)?;
        let commit = match object.peel(ObjectType::Commit) {
            Ok(object) => match object.into_commit() {
                Ok(commit) => commit,
                Err(_) => return Ok(None),
            },
            Err(_) => return Ok(None),
        };

        let tree = commit.tree()?;
        let entry = match tree.get_path(Path::new(recipe_name)) {
            Ok(entry) => entry,
            Err(_) => return Ok(None),
        };
        let blob = match repo.find_blob(entry.id()) {
            Ok(blob) => blob,
            Err(_) => return Ok(None),
        };
        let contents = match std::str::from_utf8(blob.content()) {
            Ok(contents) => contents,
            Err(_) => return Ok(None),
        };
        let recipe = match crate::recipe::parse_modern_str(contents, Path::new(recipe_name)) {
            Ok(recipe) => recipe,
            Err(_) => return Ok(None),
        };

        let author = commit.author();
        let timestamp = author.when().seconds();
        let date = DateTime::from_timestamp(timestamp, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        Ok(Some(PackageUpdate {
            release: recipe.release,
            date,
            version: recipe.version,
            comment: commit.message().unwrap_or("").trim().to_string(),
            author: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            timestamp,
        }))
    }

    /// The commit time of the newest update, used to pin build timestamps
    pub fn last_update_time(&self) -> Option<i64> {
        self.updates.first().map(|u| u.timestamp)
    }

    /// Serialize the history to XML
    pub fn encode(&self) -> Result<String> {
        let body = quick_xml::se::to_string(self).map_err(|e| Error::XmlEncode(e.to_string()))?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n{body}\n"))
    }

    /// Write the history.xml that ypkg-build consumes
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.encode()?).map_err(|e| Error::io(path, e))
    }
}

/// Convenience wrapper: history for the recipe, honouring its kind
pub fn for_recipe(recipe: &Recipe) -> Result<Option<PackageHistory>> {
    PackageHistory::discover(&recipe.path)
}
