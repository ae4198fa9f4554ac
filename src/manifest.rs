// src/manifest.rs

//! Transit manifests
//!
//! A `.tram` file accompanies built packages uploaded to a build server,
//! so the receiving side can check the payload is intentional, complete
//! and unmodified. The format is TOML:
//!
//! ```toml
//! [manifest]
//! version = "1.0"
//! target = "unstable"
//!
//! [[file]]
//! path = "nano-7.2-5-1-x86_64.eopkg"
//! sha256 = "..."
//! ```

use crate::error::{Error, Result};
use crate::hash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Extension a transit manifest must carry
pub const MANIFEST_SUFFIX: &str = ".tram";

/// The only version this implementation produces or accepts
pub const MANIFEST_VERSION: &str = "1.0";

/// Header common to every .tram file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestHeader {
    /// Versioning to protect against future format changes
    pub version: String,
    /// The repo the uploader intends to upload *to*
    pub target: String,
}

/// Verification data for one file in the payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
    /// Relative filename, i.e. nano-7.2-5-1-x86_64.eopkg
    pub path: String,
    /// Integrity checksum for post-upload verification
    pub sha256: String,
}

/// A transit manifest accompanying a set of built packages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitManifest {
    pub manifest: ManifestHeader,
    #[serde(default)]
    pub file: Vec<ManifestFile>,
}

impl TransitManifest {
    /// Create an empty manifest for the named upload target
    pub fn new(target: &str) -> Self {
        Self {
            manifest: ManifestHeader {
                version: MANIFEST_VERSION.to_string(),
                target: target.to_string(),
            },
            file: Vec::new(),
        }
    }

    /// Add a built package to the payload, hashing it on the spot
    pub fn add_file(&mut self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.ends_with(".eopkg") {
            return Err(Error::ManifestInvalid {
                reason: format!("{name} is not an eopkg"),
            });
        }
        self.file.push(ManifestFile {
            path: name,
            sha256: hash::sha256_file(path)?,
        });
        Ok(())
    }

    /// Serialize to TOML
    pub fn encode(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Parse and structurally validate a manifest
    pub fn decode(contents: &str) -> Result<Self> {
        let manifest: TransitManifest = toml::from_str(contents)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest from disk and verify the checksums of its sibling
    /// files.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let manifest = Self::decode(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.verify_files(base)?;
        Ok(manifest)
    }

    /// Dump the manifest to the given path
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.encode()?).map_err(|e| Error::io(path, e))
    }

    /// Structural validation: version, target, file list shape
    pub fn validate(&self) -> Result<()> {
        if self.manifest.version != MANIFEST_VERSION {
            return Err(Error::ManifestInvalid {
                reason: "version".to_string(),
            });
        }
        if self.manifest.target.trim().is_empty() {
            return Err(Error::ManifestInvalid {
                reason: "target".to_string(),
            });
        }
        if self.file.is_empty() {
            return Err(Error::ManifestInvalid {
                reason: "no files".to_string(),
            });
        }
        for f in &self.file {
            if !f.path.ends_with(".eopkg") {
                return Err(Error::ManifestInvalid {
                    reason: format!("{} is not an eopkg", f.path),
                });
            }
            if f.sha256.trim().is_empty() {
                return Err(Error::ManifestInvalid {
                    reason: format!("{} has no checksum", f.path),
                });
            }
        }
        Ok(())
    }

    /// Recompute every file digest relative to `base` and compare
    pub fn verify_files(&self, base: &Path) -> Result<()> {
        for f in &self.file {
            let actual = hash::sha256_file(&base.join(&f.path))?;
            if actual != f.sha256 {
                return Err(Error::ManifestChecksumMismatch {
                    path: f.path.clone(),
                    expected: f.sha256.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransitManifest {
        TransitManifest {
            manifest: ManifestHeader {
                version: "1.0".to_string(),
                target: "unstable".to_string(),
            },
            file: vec![ManifestFile {
                path: "nano-7.2-5-1-x86_64.eopkg".to_string(),
                sha256: "aa".repeat(32),
            }],
        }
    }

    #[test]
    fn test_round_trip() {
        let manifest = sample();
        let encoded = manifest.encode().unwrap();
        let decoded = TransitManifest::decode(&encoded).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let mut manifest = sample();
        manifest.manifest.version = "2.0".to_string();
        match TransitManifest::decode(&manifest.encode().unwrap()) {
            Err(Error::ManifestInvalid { reason }) => assert_eq!(reason, "version"),
            other => panic!("expected ManifestInvalid, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_empty_target() {
        let mut manifest = sample();
        manifest.manifest.target = String::new();
        assert!(TransitManifest::decode(&manifest.encode().unwrap()).is_err());
    }

    #[test]
    fn test_rejects_empty_file_list() {
        let mut manifest = sample();
        manifest.file.clear();
        assert!(TransitManifest::decode(&manifest.encode().unwrap()).is_err());
    }

    #[test]
    fn test_rejects_non_eopkg_path() {
        let mut manifest = sample();
        manifest.file[0].path = "evil.sh".to_string();
        assert!(TransitManifest::decode(&manifest.encode().unwrap()).is_err());
    }

    #[test]
    fn test_rejects_empty_checksum() {
        let mut manifest = sample();
        manifest.file[0].sha256 = String::new();
        assert!(TransitManifest::decode(&manifest.encode().unwrap()).is_err());
    }

    #[test]
    fn test_add_file_requires_eopkg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hello").unwrap();

        let mut manifest = TransitManifest::new("unstable");
        assert!(manifest.add_file(&path).is_err());
    }

    #[test]
    fn test_checksum_verification() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("nano-7.2-5-1-x86_64.eopkg");
        fs::write(&pkg, b"package payload").unwrap();

        let mut manifest = TransitManifest::new("unstable");
        manifest.add_file(&pkg).unwrap();
        let out = dir.path().join("nano.tram");
        manifest.write(&out).unwrap();

        // Intact payload verifies
        TransitManifest::from_file(&out).unwrap();

        // Tampered payload is caught
        fs::write(&pkg, b"tampered payload").unwrap();
        match TransitManifest::from_file(&out) {
            Err(Error::ManifestChecksumMismatch { path, .. }) => {
                assert_eq!(path, "nano-7.2-5-1-x86_64.eopkg");
            }
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }
}
