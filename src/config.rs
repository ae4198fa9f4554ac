// src/config.rs

//! Global solbuild configuration
//!
//! Configuration is stateless: vendor defaults live in /usr/share/solbuild
//! and the admin overrides them from /etc/solbuild. Every `*.conf` file in
//! those directories is layered onto one [`GlobalConfig`], vendor files
//! first, so /etc always wins.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Locations scanned for configuration, in increasing precedence
pub const CONFIG_PATHS: &[&str] = &["/usr/share/solbuild", "/etc/solbuild"];

/// Suffix a file must carry to be picked up as global configuration
pub const CONFIG_SUFFIX: &str = ".conf";

/// Global defaults for solbuild
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Name of the profile used when none is requested
    pub default_profile: String,
    /// Whether builds should place the overlay upperdir on a tmpfs
    pub enable_tmpfs: bool,
    /// Bounding size for the tmpfs, passed verbatim to mount
    pub tmpfs_size: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_profile: "main-x86_64".to_string(),
            enable_tmpfs: false,
            tmpfs_size: String::new(),
        }
    }
}

impl GlobalConfig {
    /// Load configuration from the system paths, falling back to defaults
    /// when no file exists.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_PATHS)
    }

    /// Load configuration from an explicit list of directories, lowest
    /// precedence first.
    pub fn load_from<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut config = Self::default();

        for dir in paths {
            let dir = dir.as_ref();
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            let mut files: Vec<_> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().ends_with(CONFIG_SUFFIX))
                        .unwrap_or(false)
                })
                .collect();
            files.sort();

            for path in files {
                debug!(path = %path.display(), "loading configuration");
                let contents = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
                let overlay: PartialConfig = toml::from_str(&contents)?;
                overlay.apply(&mut config);
            }
        }
        Ok(config)
    }
}

/// One configuration file; absent keys leave the accumulated value alone
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    default_profile: Option<String>,
    enable_tmpfs: Option<bool>,
    tmpfs_size: Option<String>,
}

impl PartialConfig {
    fn apply(self, config: &mut GlobalConfig) {
        if let Some(profile) = self.default_profile {
            config.default_profile = profile;
        }
        if let Some(tmpfs) = self.enable_tmpfs {
            config.enable_tmpfs = tmpfs;
        }
        if let Some(size) = self.tmpfs_size {
            config.tmpfs_size = size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        let empty = tempfile::tempdir().unwrap();
        let config = GlobalConfig::load_from(&[empty.path()]).unwrap();
        assert_eq!(config.default_profile, "main-x86_64");
        assert!(!config.enable_tmpfs);
        assert!(config.tmpfs_size.is_empty());
    }

    #[test]
    fn test_later_directory_wins() {
        let vendor = tempfile::tempdir().unwrap();
        let admin = tempfile::tempdir().unwrap();
        fs::write(
            vendor.path().join("00-vendor.conf"),
            "default_profile = \"unstable-x86_64\"\nenable_tmpfs = true\n",
        )
        .unwrap();
        fs::write(
            admin.path().join("99-local.conf"),
            "default_profile = \"main-x86_64\"\n",
        )
        .unwrap();

        let config = GlobalConfig::load_from(&[vendor.path(), admin.path()]).unwrap();
        // /etc layer overrides the profile but tmpfs survives from vendor
        assert_eq!(config.default_profile, "main-x86_64");
        assert!(config.enable_tmpfs);
    }

    #[test]
    fn test_tmpfs_size_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tmpfs.conf"),
            "enable_tmpfs = true\ntmpfs_size = \"16G\"\n",
        )
        .unwrap();

        let config = GlobalConfig::load_from(&[dir.path()]).unwrap();
        assert_eq!(config.tmpfs_size, "16G");
    }

    #[test]
    fn test_non_conf_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("junk.txt"), "default_profile = \"x\"").unwrap();
        let config = GlobalConfig::load_from(&[dir.path()]).unwrap();
        assert_eq!(config.default_profile, "main-x86_64");
    }
}
