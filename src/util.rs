// src/util.rs

//! Small filesystem helpers shared across the session flows

use crate::error::{Error, Result};
use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

/// Copy the asset at `source` into the directory `destdir`.
///
/// A file lands as `destdir/<basename>`; a directory is copied recursively
/// under `destdir/<basename>`. Directories are created 0755 throughout, as
/// the build only cares about the files themselves; file modes are
/// preserved by the copy. Symlinks are reproduced, not followed.
pub fn copy_all(source: &Path, destdir: &Path) -> Result<()> {
    let name = source
        .file_name()
        .ok_or_else(|| Error::io(source, std::io::Error::other("source has no basename")))?;

    fs::create_dir_all(destdir).map_err(|e| Error::io(destdir, e))?;

    if !source.is_dir() {
        let target = destdir.join(name);
        copy_entry(source, &target)?;
        return Ok(());
    }

    let base = destdir.join(name);
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(|e| {
            Error::io(source, std::io::Error::other(e.to_string()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir stays under its root");
        let target = base.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
            fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
                .map_err(|e| Error::io(&target, e))?;
        } else {
            copy_entry(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn copy_entry(source: &Path, target: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source).map_err(|e| Error::io(source, e))?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(source).map_err(|e| Error::io(source, e))?;
        if target.exists() {
            fs::remove_file(target).map_err(|e| Error::io(target, e))?;
        }
        symlink(&link, target).map_err(|e| Error::io(target, e))?;
    } else {
        fs::copy(source, target).map_err(|e| Error::io(target, e))?;
    }
    Ok(())
}

/// Recursively change ownership of `root` and everything below it.
/// Symlinks themselves are re-owned, never their targets.
pub fn chown_all(root: &Path, uid: u32, gid: u32) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry =
            entry.map_err(|e| Error::io(root, std::io::Error::other(e.to_string())))?;
        let path = CString::new(entry.path().as_os_str().as_bytes())
            .map_err(|e| Error::io(entry.path(), std::io::Error::other(e)))?;
        let rc = unsafe { libc::lchown(path.as_ptr(), uid, gid) };
        if rc != 0 {
            return Err(Error::io(entry.path(), std::io::Error::last_os_error()));
        }
    }
    Ok(())
}
