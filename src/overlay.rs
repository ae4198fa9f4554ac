// src/overlay.rs

//! Per-recipe overlayfs workspaces
//!
//! An Overlay composes a read-only backing image (lower), a throwaway
//! upper/work pair and a union mountpoint into the writable root a build
//! runs in. Layout below the base directory:
//!
//! ```text
//! /var/cache/solbuild/<profile>/<recipe>/
//!     work/   overlayfs workdir
//!     tmp/    upperdir, where real inode changes land
//!     img/    loop-mounted backing image (ro)
//!     union/  the unified root
//! ```
//!
//! Optionally the whole base directory sits on a tmpfs for fast builds.
//! Four state flags track which layers are mounted so teardown can always
//! be replayed safely, no matter where a previous attempt stopped.

use crate::chroot::ChrootExecutor;
use crate::error::{Error, Result};
use crate::image::BackingImage;
use crate::mounts::MountManager;
use crate::recipe::Recipe;
use nix::mount::MsFlags;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The root in which we form all solbuild cache paths; these are the
/// throwaway build roots.
pub const OVERLAY_ROOT_DIR: &str = "/var/cache/solbuild";

/// An Overlay is formed from a backing image & recipe combination
pub struct Overlay {
    /// Base directory containing the whole workspace
    pub base_dir: PathBuf,
    /// overlayfs workdir
    pub work_dir: PathBuf,
    /// Upper dir, where real inode changes happen
    pub upper_dir: PathBuf,
    /// Where the backing image is loop-mounted (ro)
    pub img_dir: PathBuf,
    /// The union mountpoint
    pub mount_point: PathBuf,
    /// Path to the lockfile guarding this overlay
    pub lock_path: PathBuf,

    /// Path of the backing image file
    image_path: PathBuf,

    /// Whether to put the workspace on a tmpfs
    pub enable_tmpfs: bool,
    /// Size to bound the tmpfs with, verbatim mount option
    pub tmpfs_size: String,

    /// Mounts performed by stagers that must go before the VFS teardown
    pub extra_mounts: Vec<PathBuf>,

    mounted_img: bool,
    mounted_overlay: bool,
    mounted_vfs: bool,
    mounted_tmpfs: bool,
}

impl Overlay {
    /// Create the overlay description for a (profile, image, recipe) triple.
    /// Nothing touches the disk until [`mount`](Self::mount).
    pub fn new(profile_name: &str, back: &BackingImage, recipe: &Recipe) -> Self {
        let base_dir = Path::new(OVERLAY_ROOT_DIR)
            .join(profile_name)
            .join(&recipe.name);
        Self {
            work_dir: base_dir.join("work"),
            upper_dir: base_dir.join("tmp"),
            img_dir: base_dir.join("img"),
            mount_point: base_dir.join("union"),
            // Not with_extension: recipe names may carry dots themselves
            lock_path: PathBuf::from(format!("{}.lock", base_dir.display())),
            image_path: back.image_path.clone(),
            base_dir,
            enable_tmpfs: false,
            tmpfs_size: String::new(),
            extra_mounts: Vec::new(),
            mounted_img: false,
            mounted_overlay: false,
            mounted_vfs: false,
            mounted_tmpfs: false,
        }
    }

    /// Make sure all workspace directories exist, 0755
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.base_dir,
            &self.work_dir,
            &self.upper_dir,
            &self.img_dir,
            &self.mount_point,
        ] {
            if dir.exists() {
                continue;
            }
            debug!(dir = %dir.display(), "creating overlay storage directory");
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }
        Ok(())
    }

    /// Purge a stale workspace left behind by an earlier build
    pub fn clean_existing(&self) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }
        debug!(dir = %self.base_dir.display(), "removing stale workspace");
        fs::remove_dir_all(&self.base_dir).map_err(|e| Error::io(&self.base_dir, e))
    }

    /// Bring up the overlay stack: optional tmpfs, loop-mounted image,
    /// then the overlayfs union, then the eopkg filesystem layout repair.
    pub fn mount(&mut self, mounts: &MountManager) -> Result<()> {
        debug!("mounting overlayfs");

        if self.enable_tmpfs {
            fs::create_dir_all(&self.base_dir).map_err(|e| Error::io(&self.base_dir, e))?;
            let options = if self.tmpfs_size.is_empty() {
                None
            } else {
                Some(format!("size={}", self.tmpfs_size))
            };
            debug!(point = %self.base_dir.display(), size = %self.tmpfs_size, "mounting root tmpfs");
            mounts.mount(
                "tmpfs-root",
                &self.base_dir,
                "tmpfs",
                MsFlags::MS_RELATIME,
                options.as_deref(),
            )?;
            self.mounted_tmpfs = true;
        }

        self.ensure_dirs()?;

        debug!(image = %self.image_path.display(), "mounting backing image");
        mounts.mount_loop(&self.image_path, &self.img_dir, true)?;
        self.mounted_img = true;

        let options = format!(
            "lowerdir={},upperdir={},workdir={}",
            self.img_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        );
        debug!(target = %self.mount_point.display(), options = %options, "mounting overlayfs");
        mounts.mount(
            "overlay",
            &self.mount_point,
            "overlay",
            MsFlags::empty(),
            Some(&options),
        )?;
        self.mounted_overlay = true;

        // Must happen before any more overlay work
        ensure_eopkg_layout(&self.mount_point)?;
        Ok(())
    }

    /// Bring up the virtual filesystems inside the union
    pub fn mount_vfs(&mut self, mounts: &MountManager) -> Result<()> {
        let dev = self.mount_point.join("dev");
        let pts = dev.join("pts");
        let shm = dev.join("shm");
        let proc = self.mount_point.join("proc");
        let sys = self.mount_point.join("sys");

        for dir in [&dev, &pts, &proc, &sys, &shm] {
            if dir.exists() {
                continue;
            }
            debug!(dir = %dir.display(), "creating VFS directory");
            fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        }

        mounts.mount("devtmpfs", &dev, "devtmpfs", MsFlags::MS_NOSUID, Some("mode=755"))?;
        self.mounted_vfs = true;
        mounts.mount(
            "devpts",
            &pts,
            "devpts",
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            Some("gid=5,mode=620"),
        )?;
        mounts.mount(
            "proc",
            &proc,
            "proc",
            MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
            None,
        )?;
        mounts.mount("sysfs", &sys, "sysfs", MsFlags::empty(), None)?;
        mounts.mount("tmpfs-shm", &shm, "tmpfs", MsFlags::empty(), None)?;
        Ok(())
    }

    /// Record a stager mount for teardown ordering
    pub fn push_extra_mount(&mut self, target: impl Into<PathBuf>) {
        self.extra_mounts.push(target.into());
    }

    /// Tear the overlay stack down again, newest layer first.
    ///
    /// Gated by the state flags, so repeated calls (and calls after a
    /// partial mount) are safe.
    pub fn unmount(&mut self, mounts: &MountManager) -> Result<()> {
        for target in self.extra_mounts.drain(..).rev() {
            if let Err(e) = mounts.unmount(&target) {
                debug!(target = %target.display(), error = %e, "extra mount already gone");
            }
        }

        if self.mounted_vfs {
            let mp = &self.mount_point;
            for target in [
                mp.join("dev/pts"),
                mp.join("dev/shm"),
                mp.join("dev"),
                mp.join("proc"),
                mp.join("sys"),
            ] {
                if let Err(e) = mounts.unmount(&target) {
                    debug!(target = %target.display(), error = %e, "vfs unmount");
                }
            }
            self.mounted_vfs = false;
        }

        if self.mounted_overlay {
            mounts.unmount(&self.mount_point)?;
            self.mounted_overlay = false;
        }
        if self.mounted_img {
            mounts.unmount(&self.img_dir)?;
            self.mounted_img = false;
        }
        if self.mounted_tmpfs {
            mounts.unmount(&self.base_dir)?;
            self.mounted_tmpfs = false;
        }
        Ok(())
    }

    /// Whether any layer of this overlay is still mounted
    pub fn is_mounted(&self) -> bool {
        self.mounted_img || self.mounted_overlay || self.mounted_vfs || self.mounted_tmpfs
    }

    /// Bring up the loopback interface inside the container, for sessions
    /// that dropped the network namespace.
    pub fn configure_loopback(&self, executor: &ChrootExecutor) -> Result<()> {
        info!("configuring container networking");
        executor.run(&self.mount_point, "ip link set lo up")
    }
}

/// Repair the filesystem layout expectations of eopkg inside `root`.
///
/// /run is recreated from scratch, the legacy /var/lock and /var/run
/// symlinks are restored, and the package cache directory is provided.
/// Idempotent.
pub fn ensure_eopkg_layout(root: &Path) -> Result<()> {
    let run = root.join("run");
    if run.exists() {
        fs::remove_dir_all(&run).map_err(|e| Error::io(&run, e))?;
    }
    fs::create_dir_all(run.join("lock")).map_err(|e| Error::io(&run, e))?;

    let var = root.join("var");
    fs::create_dir_all(var.join("cache/eopkg/packages")).map_err(|e| Error::io(&var, e))?;

    let var_lock = var.join("lock");
    if !var_lock.exists() {
        symlink("../run/lock", &var_lock).map_err(|e| Error::io(&var_lock, e))?;
    }
    let var_run = var.join("run");
    if !var_run.exists() {
        symlink("../run", &var_run).map_err(|e| Error::io(&var_run, e))?;
    }
    Ok(())
}
