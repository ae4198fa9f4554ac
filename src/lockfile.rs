// src/lockfile.rs

//! On-disk advisory locking with live-owner detection
//!
//! Every contended resource (an overlay root, a backing image) is guarded by
//! a lockfile holding the owner's pid in decimal. The pid payload is purely
//! informational; the kernel `flock` on the descriptor is authoritative. The
//! payload exists so a second invocation can print *who* owns the resource,
//! and so a lock left behind by a killed process can be recognised as stale
//! and reclaimed.

use crate::error::{Error, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A Lockfile guards a single on-disk resource against concurrent sessions
pub struct Lockfile {
    path: PathBuf,
    /// Last pid read from the file that wasn't ours
    owner_pid: i32,
    our_pid: i32,
    handle: File,
    owner: bool,
}

impl Lockfile {
    /// Open (creating if needed) the lockfile at `path`.
    ///
    /// Parent directories are created 0755; the file itself 0644. The
    /// returned lock is not yet acquired.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            owner_pid: -1,
            our_pid: std::process::id() as i32,
            handle,
            owner: false,
        })
    }

    /// Attempt to take exclusive ownership of the lockfile.
    ///
    /// A pid payload referring to a live foreign process fails with
    /// [`Error::LockContention`]; a malformed or dead payload is treated as
    /// stale and reclaimed. The flock itself is non-blocking, so a race
    /// against another live locker surfaces immediately rather than hanging.
    pub fn acquire(&mut self) -> Result<()> {
        match self.read_pid() {
            Ok(pid) => {
                // Zero-signal probe: is the recorded owner still alive?
                // EPERM still means the pid exists, just not as our uid.
                let alive = match kill(Pid::from_raw(pid), None) {
                    Ok(()) => true,
                    Err(nix::errno::Errno::EPERM) => true,
                    Err(_) => false,
                };
                if alive && pid != self.our_pid {
                    self.owner_pid = pid;
                    return Err(Error::LockContention {
                        pid,
                        exe: owner_exe(pid),
                    });
                }
            }
            Err(Error::StaleLock) => {
                debug!(path = %self.path.display(), "reclaiming dead lockfile");
            }
            Err(e) => return Err(e),
        }

        let rc = unsafe { libc::flock(self.handle.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                // Someone locked it between our probe and the flock
                let pid = self.read_pid().unwrap_or(-1);
                self.owner_pid = pid;
                return Err(Error::LockContention {
                    pid,
                    exe: owner_exe(pid),
                });
            }
            return Err(Error::io(&self.path, err));
        }

        // We hold the kernel lock; stamp our identity into the file.
        self.handle
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io(&self.path, e))?;
        self.handle
            .set_len(0)
            .map_err(|e| Error::io(&self.path, e))?;
        write!(self.handle, "{}", self.our_pid).map_err(|e| Error::io(&self.path, e))?;
        self.handle.flush().map_err(|e| Error::io(&self.path, e))?;

        self.owner = true;
        Ok(())
    }

    /// The last foreign pid seen in the lockfile, for diagnostics
    pub fn owner_pid(&self) -> i32 {
        self.owner_pid
    }

    /// Release the advisory lock. Fails with [`Error::NotOwner`] if we never
    /// acquired it.
    pub fn release(&mut self) -> Result<()> {
        if !self.owner {
            return Err(Error::NotOwner);
        }
        let rc = unsafe { libc::flock(self.handle.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return Err(Error::io(&self.path, err));
        }
        self.owner = false;
        Ok(())
    }

    /// Dispose of the lockfile, unlinking it only if we were the owner
    pub fn clean(&mut self) -> Result<()> {
        let was_owner = self.owner;
        if was_owner {
            self.release()?;
        }
        if was_owner {
            fs::remove_file(&self.path).map_err(|e| Error::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Whether we currently hold the lock
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    fn read_pid(&self) -> Result<i32> {
        let mut contents = String::new();
        let mut file = File::open(&self.path).map_err(|e| Error::io(&self.path, e))?;
        file.read_to_string(&mut contents)
            .map_err(|e| Error::io(&self.path, e))?;
        contents.trim().parse::<i32>().map_err(|_| Error::StaleLock)
    }
}

/// Resolve the executable of `pid` through /proc, for contention messages
pub fn owner_exe(pid: i32) -> String {
    fs::read_link(format!("/proc/{pid}/exe"))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| String::from("unknown process"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = Lockfile::open(dir.path().join("a.lock")).unwrap();
        lock.acquire().unwrap();
        assert!(lock.is_owner());
        lock.release().unwrap();
        assert!(!lock.is_owner());
    }

    #[test]
    fn test_acquire_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deeply/nested/b.lock");
        let mut lock = Lockfile::open(&nested).unwrap();
        lock.acquire().unwrap();
        assert!(nested.exists());
    }

    #[test]
    fn test_stale_pid_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.lock");
        // No process can have this pid; pid_max tops out well below it.
        fs::write(&path, "999999999").ok();
        // Even an unparseable pid is just stale, never fatal.
        fs::write(&path, "not-a-pid").unwrap();

        let mut lock = Lockfile::open(&path).unwrap();
        lock.acquire().unwrap();
        assert!(lock.is_owner());

        let stamped = fs::read_to_string(&path).unwrap();
        assert_eq!(stamped.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_own_pid_is_not_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.lock");
        fs::write(&path, std::process::id().to_string()).unwrap();

        let mut lock = Lockfile::open(&path).unwrap();
        lock.acquire().unwrap();
        assert!(lock.is_owner());
    }

    #[test]
    fn test_live_foreign_pid_contends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.lock");
        // pid 1 is always alive and never us
        fs::write(&path, "1").unwrap();

        let mut lock = Lockfile::open(&path).unwrap();
        match lock.acquire() {
            Err(Error::LockContention { pid, .. }) => assert_eq!(pid, 1),
            other => panic!("expected contention, got {other:?}"),
        }
        assert_eq!(lock.owner_pid(), 1);
    }

    #[test]
    fn test_release_without_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = Lockfile::open(dir.path().join("f.lock")).unwrap();
        match lock.release() {
            Err(Error::NotOwner) => {}
            other => panic!("expected NotOwner, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_unlinks_only_for_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.lock");

        let mut lock = Lockfile::open(&path).unwrap();
        lock.acquire().unwrap();
        lock.clean().unwrap();
        assert!(!path.exists());

        // Non-owner clean leaves the file in place
        fs::write(&path, "1").unwrap();
        let mut lock = Lockfile::open(&path).unwrap();
        assert!(lock.acquire().is_err());
        lock.clean().unwrap();
        assert!(path.exists());
    }
}
