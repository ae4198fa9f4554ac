// src/userinfo.rs

//! Packager identity for ypkg builds
//!
//! ypkg-build stamps the resulting package with the packager's name and
//! email, read from `.solus/packager` in the build user's home. We derive
//! that identity from the invoker's git configuration, with a plain
//! fallback so a build never fails over missing identity.

use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::Path;

/// Name/email pair propagated into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub email: String,
}

impl UserInfo {
    /// Always succeeds; falls back through git config to a stub identity.
    pub fn discover() -> Self {
        if let Ok(config) = git2::Config::open_default() {
            let name = config.get_string("user.name").ok();
            let email = config.get_string("user.email").ok();
            if let (Some(name), Some(email)) = (name, email) {
                return Self { name, email };
            }
        }

        let user = env::var("SUDO_USER")
            .or_else(|_| env::var("USER"))
            .unwrap_or_else(|_| "root".to_string());
        Self {
            email: format!("{user}@localhost"),
            name: user,
        }
    }

    /// Write the `.solus/packager` file ypkg expects
    pub fn write_packager(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let contents = format!("[Packager]\nName={}\nEmail={}\n", self.name, self.email);
        fs::write(path, contents).map_err(|e| Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_never_fails() {
        let info = UserInfo::discover();
        assert!(!info.name.is_empty());
        assert!(!info.email.is_empty());
    }

    #[test]
    fn test_write_packager() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".solus/packager");
        let info = UserInfo {
            name: "A Packager".to_string(),
            email: "packager@example.com".to_string(),
        };
        info.write_packager(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("[Packager]\n"));
        assert!(contents.contains("Name=A Packager"));
        assert!(contents.contains("Email=packager@example.com"));
    }
}
