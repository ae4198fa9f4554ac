// src/session/update.rs

//! Refreshing a backing image in place
//!
//! Updates mount the image directly (no overlay) at its root directory,
//! run the same upgrade/component sequence a build would, make sure the
//! build user exists, and unmount. Writes go straight into the image, so
//! later builds start from a current base.

use super::Session;
use crate::chroot::{sane_environment, ChrootExecutor};
use crate::eopkg::EopkgManager;
use crate::error::{Error, Result};
use crate::overlay::ensure_eopkg_layout;
use crate::users;
use std::fs;
use std::sync::Arc;
use tracing::info;

impl Session {
    /// Locked -> Active: upgrade the backing image in place
    pub fn run_update(&mut self) -> Result<()> {
        self.mark_active()?;
        let image = self.image().clone();
        let mounts = self.mounts();

        info!(image = %image.name, "updating backing image");

        fs::create_dir_all(&image.root_dir).map_err(|e| Error::io(&image.root_dir, e))?;
        mounts.mount_loop(&image.image_path, &image.root_dir, false)?;
        ensure_eopkg_layout(&image.root_dir)?;
        self.check_cancelled()?;

        let executor = ChrootExecutor::new(
            sane_environment("root", "/root", self.disable_colors),
            Arc::new(self.notifier()),
        );
        let mut pkg_manager = EopkgManager::new(&image.root_dir, executor.clone());

        let result = (|| -> Result<()> {
            pkg_manager.init(&mounts)?;
            pkg_manager.start_dbus()?;
            pkg_manager.upgrade()?;
            pkg_manager.install_component("system.devel")?;
            self.check_cancelled()?;
            users::ensure_build_user(&executor, &image.root_dir)
        })();

        // The image must come back down whether or not the upgrade worked
        pkg_manager.cleanup(&mounts);
        let unmounted = mounts.unmount(&image.root_dir);

        result?;
        unmounted
    }
}
