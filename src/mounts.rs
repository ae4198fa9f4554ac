// src/mounts.rs

//! Mount bookkeeping for the build root
//!
//! Every mount performed on behalf of a session is recorded in an ordered
//! ledger so that teardown can walk it in reverse and release everything,
//! even after a partial failure. The manager is a cheap cloneable handle;
//! the session shares it with the overlay builder and the stagers.
//!
//! Plain mounts go through the `mount(2)` syscall. Loop mounts shell out to
//! `mount -o loop` so the loop device is allocated with autoclear and the
//! kernel detaches it for us on unmount.

use crate::error::{Error, Result};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct MountEntry {
    target: PathBuf,
}

/// Ordered registry of mounts with reverse-order teardown
#[derive(Clone, Default)]
pub struct MountManager {
    ledger: Arc<Mutex<Vec<MountEntry>>>,
}

impl MountManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount `source` at `target` with the given filesystem type, flags and
    /// option string, recording the mount for later teardown.
    pub fn mount(
        &self,
        source: &str,
        target: &Path,
        fstype: &str,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        debug!(source, target = %target.display(), fstype, "mounting");
        mount::<str, Path, str, str>(Some(source), target, Some(fstype), flags, data).map_err(
            |e| Error::MountFailed {
                what: target.display().to_string(),
                reason: e.to_string(),
            },
        )?;
        self.record(target);
        Ok(())
    }

    /// Loop-mount an image file at `target`
    pub fn mount_loop(&self, image: &Path, target: &Path, read_only: bool) -> Result<()> {
        let options = if read_only { "loop,ro" } else { "loop" };
        debug!(image = %image.display(), target = %target.display(), "loop mounting");
        let status = Command::new("mount")
            .arg("-o")
            .arg(options)
            .arg(image)
            .arg(target)
            .status()
            .map_err(|e| Error::io(image, e))?;
        if !status.success() {
            return Err(Error::MountFailed {
                what: image.display().to_string(),
                reason: format!("mount exited with {status}"),
            });
        }
        self.record(target);
        Ok(())
    }

    /// Bind-mount `host` onto `target`; `read_only` remounts the bind r/o.
    ///
    /// The target must already exist (directory for directory sources, plain
    /// file for file sources).
    pub fn bind(&self, host: &Path, target: &Path, read_only: bool) -> Result<()> {
        debug!(host = %host.display(), target = %target.display(), read_only, "bind mounting");
        mount::<Path, Path, str, str>(Some(host), target, None, MsFlags::MS_BIND, None).map_err(
            |e| Error::MountFailed {
                what: target.display().to_string(),
                reason: e.to_string(),
            },
        )?;
        self.record(target);

        if read_only {
            mount::<Path, Path, str, str>(
                None,
                target,
                None,
                MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY,
                None,
            )
            .map_err(|e| Error::MountFailed {
                what: format!("{} (ro remount)", target.display()),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Unmount a single target and drop it from the ledger
    pub fn unmount(&self, target: &Path) -> Result<()> {
        debug!(target = %target.display(), "unmounting");
        umount2(target, MntFlags::empty()).map_err(|e| Error::UnmountFailed {
            what: target.display().to_string(),
            reason: e.to_string(),
        })?;
        self.forget(target);
        Ok(())
    }

    /// Unmount everything in the ledger, newest first.
    ///
    /// Individual failures are logged and skipped so one busy mountpoint
    /// can't leave the rest pinned. Idempotent.
    pub fn unmount_all(&self) {
        let entries: Vec<MountEntry> = {
            let mut ledger = self.ledger.lock().unwrap();
            ledger.drain(..).rev().collect()
        };
        for entry in entries {
            if let Err(e) = umount2(&entry.target, MntFlags::empty()) {
                // Already-unmounted targets are expected here
                if e != nix::errno::Errno::EINVAL && e != nix::errno::Errno::ENOENT {
                    warn!(target = %entry.target.display(), error = %e, "failed to unmount");
                }
            }
        }
    }

    /// Number of mounts currently recorded
    pub fn len(&self) -> usize {
        self.ledger.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, target: &Path) {
        self.ledger.lock().unwrap().push(MountEntry {
            target: target.to_path_buf(),
        });
    }

    fn forget(&self, target: &Path) {
        self.ledger.lock().unwrap().retain(|e| e.target != target);
    }
}

/// Create the file at `path` (0644) if absent, so it can serve as a bind
/// target for a plain-file source.
pub fn touch(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map(|_| ())
        .map_err(|e| Error::io(path, e))
}
