// src/recipe/ypkg.rs

//! Parsing of the native ypkg `package.yml` format

use super::{Recipe, RecipeKind};
use crate::error::{Error, Result};
use crate::source::Source;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// The raw shape of a package.yml, before validation.
///
/// Versions are frequently written unquoted and parse as YAML numbers, so
/// scalar fields come in as [`Value`] and are normalised afterwards.
#[derive(Debug, Deserialize)]
struct YmlRecipe {
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    release: Option<u64>,
    /// If false (the default) networking is disabled in the build
    #[serde(default)]
    networking: bool,
    #[serde(default)]
    source: Vec<BTreeMap<String, Value>>,
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse the ypkg package.yml at `path`
pub fn parse(path: &Path) -> Result<Recipe> {
    let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    parse_str(&contents, path)
}

/// Parse a package.yml held in memory; `path` is only used for reporting
/// and for the resulting recipe's path field.
pub fn parse_str(contents: &str, path: &Path) -> Result<Recipe> {
    let raw: YmlRecipe = serde_yaml::from_str(contents).map_err(|e| Error::MalformedRecipe {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut recipe = Recipe {
        name: raw.name.as_ref().and_then(scalar).unwrap_or_default(),
        version: raw.version.as_ref().and_then(scalar).unwrap_or_default(),
        release: raw.release.unwrap_or(0),
        kind: RecipeKind::Modern,
        path: path.to_path_buf(),
        sources: Vec::new(),
        allow_network: raw.networking,
    };

    for row in &raw.source {
        for (uri, validator) in row {
            let validator = scalar(validator)
                .ok_or_else(|| recipe.malformed(format!("invalid validator for source {uri}")))?;
            recipe.sources.push(Source::new(uri, &validator, false)?);
        }
    }

    Ok(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_str_minimal() {
        let recipe = parse_str(
            "name: tool\nversion: \"2.0\"\nrelease: 3\n",
            &PathBuf::from("package.yml"),
        )
        .unwrap();
        assert_eq!(recipe.name, "tool");
        assert_eq!(recipe.version, "2.0");
        assert_eq!(recipe.release, 3);
        assert!(!recipe.allow_network);
        assert!(recipe.sources.is_empty());
    }

    #[test]
    fn test_parse_str_numeric_version() {
        let recipe = parse_str(
            "name: tool\nversion: 2.0\nrelease: 3\n",
            &PathBuf::from("package.yml"),
        )
        .unwrap();
        assert_eq!(recipe.version, "2.0");
    }

    #[test]
    fn test_parse_str_multiple_sources() {
        let yml = "name: tool\nversion: \"1.0\"\nrelease: 1\nsource:\n    - https://example.com/a.tar.gz : aa11\n    - https://example.com/b.tar.gz : bb22\n";
        let recipe = parse_str(yml, &PathBuf::from("package.yml")).unwrap();
        assert_eq!(recipe.sources.len(), 2);
    }

    #[test]
    fn test_parse_str_garbage() {
        assert!(parse_str(": [", &PathBuf::from("package.yml")).is_err());
    }
}
