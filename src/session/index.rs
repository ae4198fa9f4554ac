// src/session/index.rs

//! Repository indexing inside a build root
//!
//! The index command bind-mounts a host directory into a pristine overlay
//! and runs the distribution's own indexer over it, so the produced index
//! matches what the target image's tooling expects.

use super::Session;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Where we always mount the directory being indexed
pub const INDEX_BIND_TARGET: &str = "/hostRepo/Index";

impl Session {
    /// Locked -> Active: index the given host directory
    pub fn run_index(&mut self, dir: &Path) -> Result<()> {
        self.mark_active()?;

        let dir = dir.canonicalize().map_err(|e| Error::io(dir, e))?;
        if !dir.is_dir() {
            return Err(Error::io(&dir, std::io::Error::other("not a directory")));
        }

        info!(dir = %dir.display(), profile = %self.profile().name, "beginning indexer");

        if let Some(overlay) = self.overlay.as_ref() {
            overlay.clean_existing()?;
        }
        self.activate_root(false)?;
        self.check_cancelled()?;

        let union = self.union()?;
        let mounts = self.mounts();
        let target = union.join(INDEX_BIND_TARGET.trim_start_matches('/'));
        fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;

        info!(dir = %dir.display(), "bind mounting directory for indexing");
        mounts.bind(&dir, &target, false)?;
        self.overlay
            .as_mut()
            .ok_or(Error::NoRecipe)?
            .push_extra_mount(&target);

        info!("now indexing");
        let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
        executor.run(
            &union,
            &format!("cd {INDEX_BIND_TARGET} && eopkg index --skip-signing ."),
        )
    }
}
