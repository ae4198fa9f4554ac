// src/recipe/legacy.rs

//! Parsing of the legacy `pspec.xml` format
//!
//! Version and release live in the History section; the newest Update
//! entry (always listed first) is authoritative. Archives carry SHA-1
//! digests only.

use super::{Recipe, RecipeKind};
use crate::error::{Error, Result};
use crate::source::Source;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct XmlRecipe {
    #[serde(rename = "Source")]
    source: XmlSource,
    #[serde(rename = "History", default)]
    history: XmlHistory,
}

#[derive(Debug, Deserialize)]
struct XmlSource {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Archive", default)]
    archives: Vec<XmlArchive>,
}

#[derive(Debug, Deserialize)]
struct XmlArchive {
    #[serde(rename = "@sha1sum", default)]
    sha1sum: String,
    #[serde(rename = "$text", default)]
    uri: String,
}

#[derive(Debug, Default, Deserialize)]
struct XmlHistory {
    #[serde(rename = "Update", default)]
    updates: Vec<XmlUpdate>,
}

#[derive(Debug, Deserialize)]
struct XmlUpdate {
    #[serde(rename = "@release")]
    release: u64,
    #[serde(rename = "Version", default)]
    version: String,
}

/// Parse the legacy pspec.xml at `path`
pub fn parse(path: &Path) -> Result<Recipe> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_str(&contents, path)
}

fn parse_str(contents: &str, path: &Path) -> Result<Recipe> {
    let raw: XmlRecipe = quick_xml::de::from_str(contents).map_err(|e| Error::MalformedRecipe {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let newest = raw.history.updates.first().ok_or_else(|| Error::MalformedRecipe {
        path: path.to_path_buf(),
        reason: "pspec has no History entries".to_string(),
    })?;

    let mut recipe = Recipe {
        name: raw.source.name.trim().to_string(),
        version: newest.version.trim().to_string(),
        release: newest.release,
        kind: RecipeKind::Legacy,
        path: path.to_path_buf(),
        sources: Vec::new(),
        // Full sandboxing is not possible with the legacy format
        allow_network: true,
    };

    for archive in &raw.source.archives {
        recipe
            .sources
            .push(Source::new(archive.uri.trim(), archive.sha1sum.trim(), true)?);
    }

    Ok(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_str_orders_history() {
        let xml = r#"<PISI>
            <Source>
                <Name>tool</Name>
                <Archive sha1sum="da39a3ee5e6b4b0d3255bfef95601890afd80709" type="targz">https://example.com/tool-2.tar.gz</Archive>
            </Source>
            <History>
                <Update release="2"><Version>2.0</Version></Update>
                <Update release="1"><Version>1.0</Version></Update>
            </History>
        </PISI>"#;

        let recipe = parse_str(xml, &PathBuf::from("pspec.xml")).unwrap();
        assert_eq!(recipe.version, "2.0");
        assert_eq!(recipe.release, 2);
        assert_eq!(recipe.sources.len(), 1);
    }

    #[test]
    fn test_parse_str_empty_history_is_malformed() {
        let xml = "<PISI><Source><Name>tool</Name></Source></PISI>";
        assert!(matches!(
            parse_str(xml, &PathBuf::from("pspec.xml")),
            Err(Error::MalformedRecipe { .. })
        ));
    }

    #[test]
    fn test_parse_str_not_xml() {
        assert!(parse_str("name: tool", &PathBuf::from("pspec.xml")).is_err());
    }
}
