// src/eopkg.rs

//! In-container package manager control
//!
//! eopkg needs a system D-Bus inside the chroot for its COMAR machinery,
//! host configuration (resolver, eopkg.conf) copied in, and the shared
//! host-side package cache bound over its own cache directory so downloads
//! survive the throwaway root. This wraps all of that behind simple verbs
//! the session can call.

use crate::chroot::ChrootExecutor;
use crate::error::{Error, Result};
use crate::mounts::MountManager;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Host-side package cache shared by every profile
pub const PACKAGE_CACHE_DIR: &str = "/var/lib/solbuild/packages";

/// Host assets copied into the root when present
const HOST_ASSETS: &[&str] = &["/etc/resolv.conf", "/etc/eopkg/eopkg.conf"];

/// One configured repository inside the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEntry {
    pub id: String,
    pub uri: String,
}

/// Controller for the package manager within a build root
pub struct EopkgManager {
    root: PathBuf,
    executor: ChrootExecutor,
    dbus_active: bool,
    cache_source: PathBuf,
    cache_target: PathBuf,
    cache_mounted: bool,
}

impl EopkgManager {
    pub fn new(root: impl Into<PathBuf>, executor: ChrootExecutor) -> Self {
        let root = root.into();
        Self {
            cache_source: PathBuf::from(PACKAGE_CACHE_DIR),
            cache_target: root.join("var/cache/eopkg/packages"),
            root,
            executor,
            dbus_active: false,
            cache_mounted: false,
        }
    }

    /// Prepare the root: clear stale dbus state, copy host assets, and
    /// bind the shared package cache into place.
    pub fn init(&mut self, mounts: &MountManager) -> Result<()> {
        let stale_pid = self.dbus_pid_file();
        if stale_pid.exists() {
            fs::remove_file(&stale_pid).map_err(|e| Error::io(&stale_pid, e))?;
        }

        self.copy_assets()?;

        fs::create_dir_all(&self.cache_source).map_err(|e| Error::io(&self.cache_source, e))?;
        fs::create_dir_all(&self.cache_target).map_err(|e| Error::io(&self.cache_target, e))?;
        mounts.bind(&self.cache_source, &self.cache_target, false)?;
        self.cache_mounted = true;
        Ok(())
    }

    /// Copy host configuration into the chroot, skipping assets the host
    /// doesn't have. Parent directories are created 0755.
    pub fn copy_assets(&self) -> Result<()> {
        for asset in HOST_ASSETS {
            let source = Path::new(asset);
            if !source.exists() {
                debug!(asset, "host asset not present, skipping");
                continue;
            }
            let target = self.root.join(source.strip_prefix("/").unwrap_or(source));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::copy(source, &target).map_err(|e| Error::io(&target, e))?;
        }
        Ok(())
    }

    /// Bring up the system D-Bus inside the chroot. Idempotent.
    pub fn start_dbus(&mut self) -> Result<()> {
        if self.dbus_active {
            return Ok(());
        }
        debug!("starting d-bus");
        self.executor.run(&self.root, "dbus-uuidgen --ensure")?;
        self.executor.run(&self.root, "dbus-daemon --system")?;
        self.dbus_active = true;
        Ok(())
    }

    /// Kill the in-container D-Bus daemon via its recorded pid. Idempotent.
    pub fn stop_dbus(&mut self) -> Result<()> {
        if !self.dbus_active {
            return Ok(());
        }
        debug!("stopping d-bus");
        let pid_file = self.dbus_pid_file();
        let contents = fs::read_to_string(&pid_file).map_err(|e| Error::io(&pid_file, e))?;

        // Best effort from here down; the pid file always gets removed
        self.dbus_active = false;
        let removed = fs::remove_file(&pid_file);

        let pid: i32 = contents
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .parse()
            .map_err(|_| Error::io(&pid_file, std::io::Error::other("malformed dbus pid")))?;
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGKILL,
        )
        .map_err(Error::from)?;

        removed.map_err(|e| Error::io(&pid_file, e))
    }

    /// Upgrade the root and make sure iproute2 is available for the
    /// loopback bring-up after the network namespace is dropped.
    pub fn upgrade(&self) -> Result<()> {
        info!("upgrading system base");
        self.executor.run(&self.root, "eopkg upgrade -y")?;
        self.executor.run(&self.root, "eopkg install -y iproute2")
    }

    /// Assert that the named component is fully installed
    pub fn install_component(&self, component: &str) -> Result<()> {
        info!(component, "asserting component installation");
        self.executor
            .run(&self.root, &format!("eopkg install -c {component} -y"))
    }

    /// Enumerate repositories configured inside the root
    pub fn list_repos(&self) -> Result<Vec<RepoEntry>> {
        let index_dir = self.root.join("var/lib/eopkg/index");
        let mut repos = Vec::new();

        let entries = match fs::read_dir(&index_dir) {
            Ok(entries) => entries,
            // A fresh root simply has no repos yet
            Err(_) => return Ok(repos),
        };
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&index_dir, e))?;
            let uri_file = entry.path().join("uri");
            if !uri_file.exists() {
                continue;
            }
            let uri = fs::read_to_string(&uri_file).map_err(|e| Error::io(&uri_file, e))?;
            repos.push(RepoEntry {
                id: entry.file_name().to_string_lossy().into_owned(),
                uri: uri.trim().to_string(),
            });
        }
        repos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(repos)
    }

    /// Add the named repository inside the root
    pub fn add_repo(&self, id: &str, uri: &str) -> Result<()> {
        self.executor
            .run(&self.root, &format!("eopkg add-repo {id} {uri}"))
    }

    /// Remove the named repository inside the root
    pub fn remove_repo(&self, id: &str) -> Result<()> {
        self.executor
            .run(&self.root, &format!("eopkg remove-repo {id}"))
    }

    /// Tear down whatever we brought up: D-Bus and the cache bind
    pub fn cleanup(&mut self, mounts: &MountManager) {
        if let Err(e) = self.stop_dbus() {
            warn!(error = %e, "failed to stop d-bus");
        }
        if self.cache_mounted {
            if let Err(e) = mounts.unmount(&self.cache_target) {
                debug!(error = %e, "package cache already unmounted");
            }
            self.cache_mounted = false;
        }
    }

    fn dbus_pid_file(&self) -> PathBuf {
        self.root.join("var/run/dbus/pid")
    }
}
