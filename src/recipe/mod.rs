// src/recipe/mod.rs

//! Package recipes
//!
//! A recipe is the build specification for a single package: the modern
//! ypkg `package.yml` format, or the legacy `pspec.xml`. Parsing happens
//! once, up front; the resulting [`Recipe`] is read-only for the rest of
//! the session. A third kind, the index stub, exists purely so the `index`
//! command can reuse the overlay machinery.

mod legacy;
mod ypkg;

pub use ypkg::parse_str as parse_modern_str;

use crate::error::{Error, Result};
use crate::source::Source;
use std::path::{Path, PathBuf};

/// The kind of recipe being built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    /// The legacy pspec.xml format
    Legacy,
    /// The native ypkg package.yml format
    Modern,
    /// Faux recipe backing the `index` command
    IndexStub,
}

impl std::fmt::Display for RecipeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Modern => write!(f, "ypkg"),
            Self::IndexStub => write!(f, "index"),
        }
    }
}

/// A parsed package build specification
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Name of the package
    pub name: String,
    /// Version of this package
    pub version: String,
    /// Upgrades are based entirely on the release number
    pub release: u64,
    pub kind: RecipeKind,
    /// Absolute path to the recipe file
    pub path: PathBuf,
    /// Sources to fetch and stage for the build
    pub sources: Vec<Source>,
    /// Whether the build may keep the network namespace (ypkg only)
    pub allow_network: bool,
}

impl Recipe {
    /// Parse the recipe at `path`, dispatching on the file suffix
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let absolute = path.canonicalize().map_err(|e| Error::io(path, e))?;

        let recipe = if absolute.extension().is_some_and(|e| e == "xml") {
            legacy::parse(&absolute)?
        } else {
            ypkg::parse(&absolute)?
        };
        recipe.validate()?;
        Ok(recipe)
    }

    /// The faux recipe used by the index command to reuse the overlay
    pub fn index_stub() -> Self {
        Self {
            name: "index".to_string(),
            version: "0.1".to_string(),
            release: 1,
            kind: RecipeKind::IndexStub,
            path: PathBuf::new(),
            sources: Vec::new(),
            allow_network: false,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(self.malformed("missing name in package"));
        }
        if self.version.is_empty() {
            return Err(self.malformed("missing version in package"));
        }
        Ok(())
    }

    pub(crate) fn malformed(&self, reason: impl Into<String>) -> Error {
        Error::MalformedRecipe {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PACKAGE_YML: &str = r#"
name       : nano
version    : "7.2"
release    : 5
networking : false
source     :
    - https://www.nano-editor.org/dist/v7/nano-7.2.tar.xz : 86f3442768bd2873cec693f83cdf80b4b444ad3cc14760b74361474fc87a4526
"#;

    const PSPEC_XML: &str = r#"<?xml version="1.0" ?>
<PISI>
    <Source>
        <Name>nano</Name>
        <Homepage>https://www.nano-editor.org</Homepage>
        <Archive sha1sum="f2a628394f8dda1b9f28c7e7b89ccb9a6dbd302a" type="tarxz">https://www.nano-editor.org/dist/v7/nano-7.2.tar.xz</Archive>
    </Source>
    <History>
        <Update release="5">
            <Date>2024-01-10</Date>
            <Version>7.2</Version>
            <Comment>Bump to latest upstream.</Comment>
            <Name>A Packager</Name>
            <Email>packager@example.com</Email>
        </Update>
        <Update release="4">
            <Date>2023-06-01</Date>
            <Version>7.1</Version>
            <Comment>Previous bump.</Comment>
            <Name>A Packager</Name>
            <Email>packager@example.com</Email>
        </Update>
    </History>
</PISI>
"#;

    #[test]
    fn test_load_modern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.yml");
        fs::write(&path, PACKAGE_YML).unwrap();

        let recipe = Recipe::load(&path).unwrap();
        assert_eq!(recipe.name, "nano");
        assert_eq!(recipe.version, "7.2");
        assert_eq!(recipe.release, 5);
        assert_eq!(recipe.kind, RecipeKind::Modern);
        assert!(!recipe.allow_network);
        assert_eq!(recipe.sources.len(), 1);
        assert_eq!(recipe.sources[0].identifier(), "nano-7.2.tar.xz");
    }

    #[test]
    fn test_load_legacy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pspec.xml");
        fs::write(&path, PSPEC_XML).unwrap();

        let recipe = Recipe::load(&path).unwrap();
        assert_eq!(recipe.name, "nano");
        // Newest History entry wins
        assert_eq!(recipe.version, "7.2");
        assert_eq!(recipe.release, 5);
        assert_eq!(recipe.kind, RecipeKind::Legacy);
        // Legacy builds always keep networking
        assert!(recipe.allow_network);
        assert_eq!(recipe.sources.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(Recipe::load("/nonexistent/package.yml").is_err());
    }

    #[test]
    fn test_modern_missing_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.yml");
        fs::write(&path, "version: \"1.0\"\nrelease: 1\n").unwrap();
        assert!(matches!(
            Recipe::load(&path),
            Err(Error::MalformedRecipe { .. })
        ));
    }

    #[test]
    fn test_legacy_requires_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pspec.xml");
        fs::write(
            &path,
            "<PISI><Source><Name>nano</Name></Source><History/></PISI>",
        )
        .unwrap();
        assert!(matches!(
            Recipe::load(&path),
            Err(Error::MalformedRecipe { .. })
        ));
    }

    #[test]
    fn test_index_stub_shape() {
        let stub = Recipe::index_stub();
        assert_eq!(stub.kind, RecipeKind::IndexStub);
        assert!(stub.sources.is_empty());
        assert_eq!(stub.name, "index");
    }

    #[test]
    fn test_modern_git_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.yml");
        fs::write(
            &path,
            "name: tool\nversion: \"1.0\"\nrelease: 1\nsource:\n    - git|https://github.com/example/tool : v1.0\n",
        )
        .unwrap();

        let recipe = Recipe::load(&path).unwrap();
        assert_eq!(recipe.sources.len(), 1);
        assert_eq!(recipe.sources[0].identifier(), "tool.git");
    }

    #[test]
    fn test_modern_networking_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.yml");
        fs::write(
            &path,
            "name: tool\nversion: \"1.0\"\nrelease: 1\nnetworking: true\n",
        )
        .unwrap();

        let recipe = Recipe::load(&path).unwrap();
        assert!(recipe.allow_network);
    }

    #[test]
    fn test_modern_unquoted_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("package.yml");
        fs::write(&path, "name: tool\nversion: 1.2\nrelease: 1\n").unwrap();

        let recipe = Recipe::load(&path).unwrap();
        assert_eq!(recipe.version, "1.2");
    }
}
