// src/reaper.rs

//! Termination of processes still living inside a build root
//!
//! Before the overlay can be unmounted, nothing may keep a working
//! directory inside it. The reaper walks /proc, resolves each process's
//! cwd and terminates matches: SIGTERM first, then SIGKILL after a short
//! grace period.

use crate::error::{Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const KILL_GRACE: Duration = Duration::from_millis(400);

/// Kill every process whose current working directory sits inside `root`.
///
/// Returns the number of processes signalled. Entries under /proc that
/// aren't valid pids, or vanish mid-scan, are skipped.
pub fn reap(root: &Path) -> Result<usize> {
    let root = fs::canonicalize(root).map_err(|e| Error::io(root, e))?;
    let mut reaped = 0;

    let proc_entries = fs::read_dir("/proc").map_err(|e| Error::io("/proc", e))?;
    for entry in proc_entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let pid: i32 = match name.parse() {
            Ok(pid) => pid,
            Err(_) => continue,
        };

        // Processes may exit between readdir and here
        let cwd = match fs::read_link(entry.path().join("cwd")) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if !cwd.starts_with(&root) {
            continue;
        }

        info!(pid, cwd = %cwd.display(), "killing child process in chroot");
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!(pid, error = %e, "error terminating process, attempting force kill");
        }
        thread::sleep(KILL_GRACE);
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
            // Normal when SIGTERM already did the job
            if e != nix::errno::Errno::ESRCH {
                warn!(pid, error = %e, "error killing process");
            }
        }
        reaped += 1;
    }
    Ok(reaped)
}
