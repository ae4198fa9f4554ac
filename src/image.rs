// src/image.rs

//! Backing images
//!
//! A backing image is the read-only base rootfs used as the overlay lower
//! layer. Images are distributed xz-compressed; `init` fetches the `.img.xz`
//! with curl and decompresses it in place. An image counts as installed
//! once the decompressed `.img` exists.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Where we keep the rootfs images for build profiles
pub const IMAGES_DIR: &str = "/var/lib/solbuild/images";

/// Where update sessions mount an image directly, without an overlay
pub const ROOTS_DIR: &str = "/var/lib/solbuild/roots";

/// Common suffix for decompressed images
pub const IMAGE_SUFFIX: &str = ".img";

/// Common suffix for fetched images
pub const IMAGE_COMPRESSED_SUFFIX: &str = ".img.xz";

/// Storage area for base images
pub const IMAGE_BASE_URI: &str = "https://solus-project.com/image_root";

/// A BackingImage is the core of any given profile
#[derive(Debug, Clone)]
pub struct BackingImage {
    /// Name of the image (the profile's `image` key)
    pub name: String,
    /// Absolute path to the .img file
    pub image_path: PathBuf,
    /// Absolute path to the .img.xz file
    pub compressed_path: PathBuf,
    /// URI of the image origin
    pub uri: String,
    /// Where update sessions mount this image
    pub root_dir: PathBuf,
    /// Image-scoped lockfile path
    pub lock_path: PathBuf,
}

impl BackingImage {
    /// Return a correctly configured backing image for the given name
    pub fn new(name: &str) -> Self {
        let images = Path::new(IMAGES_DIR);
        Self {
            name: name.to_string(),
            image_path: images.join(format!("{name}{IMAGE_SUFFIX}")),
            compressed_path: images.join(format!("{name}{IMAGE_COMPRESSED_SUFFIX}")),
            uri: format!("{IMAGE_BASE_URI}/{name}{IMAGE_COMPRESSED_SUFFIX}"),
            root_dir: Path::new(ROOTS_DIR).join(name),
            lock_path: images.join(format!("{name}.lock")),
        }
    }

    /// Whether the decompressed image is present and usable
    pub fn is_installed(&self) -> bool {
        self.image_path.exists()
    }

    /// Whether the compressed image has been downloaded
    pub fn is_fetched(&self) -> bool {
        self.compressed_path.exists()
    }

    /// Download the compressed image via curl
    pub fn fetch(&self) -> Result<()> {
        if let Some(parent) = self.compressed_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        info!(image = %self.name, uri = %self.uri, "fetching backing image");
        let status = Command::new("curl")
            .arg("-L")
            .arg("-o")
            .arg(&self.compressed_path)
            .arg("--progress-bar")
            .arg(&self.uri)
            .status()
            .map_err(|e| Error::io(&self.compressed_path, e))?;
        if !status.success() {
            return Err(Error::ChildFailed {
                cmd: format!("curl {}", self.uri),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    /// Decompress the fetched image, consuming the .img.xz
    pub fn decompress(&self) -> Result<()> {
        if !self.is_fetched() {
            return Err(Error::InvalidImage(format!(
                "{}: compressed image missing",
                self.name
            )));
        }
        info!(image = %self.name, "decompressing backing image");
        let status = Command::new("unxz")
            .arg(&self.compressed_path)
            .status()
            .map_err(|e| Error::io(&self.compressed_path, e))?;
        if !status.success() {
            return Err(Error::ChildFailed {
                cmd: format!("unxz {}", self.compressed_path.display()),
                status: status.code().unwrap_or(-1),
            });
        }
        if !self.is_installed() {
            return Err(Error::InvalidImage(format!(
                "{}: decompression produced no image",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_paths() {
        let image = BackingImage::new("unstable-x86_64");
        assert_eq!(
            image.image_path,
            Path::new("/var/lib/solbuild/images/unstable-x86_64.img")
        );
        assert_eq!(
            image.compressed_path,
            Path::new("/var/lib/solbuild/images/unstable-x86_64.img.xz")
        );
        assert_eq!(
            image.lock_path,
            Path::new("/var/lib/solbuild/images/unstable-x86_64.lock")
        );
        assert_eq!(
            image.root_dir,
            Path::new("/var/lib/solbuild/roots/unstable-x86_64")
        );
        assert!(image.uri.ends_with("/unstable-x86_64.img.xz"));
    }
}
