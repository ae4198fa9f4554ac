// src/session/chroot.rs

//! Interactive chroot sessions for debugging builds

use super::build::fetch_missing;
use super::Session;
use crate::error::{Error, Result};
use crate::namespaces;
use crate::recipe::RecipeKind;
use crate::users::{BUILD_USER, BUILD_USER_SHELL};
use tracing::info;

impl Session {
    /// Locked -> Active: prepare the root exactly like a build would, then
    /// drop the operator into a login shell inside it.
    pub fn run_chroot(&mut self) -> Result<()> {
        self.mark_active()?;
        let recipe = self.recipe()?.clone();

        info!(
            package = %recipe.name,
            version = %recipe.version,
            kind = %recipe.kind,
            "beginning chroot"
        );

        if let Some(overlay) = self.overlay.as_ref() {
            overlay.clean_existing()?;
        }
        self.check_cancelled()?;

        self.activate_root(recipe.kind == RecipeKind::Modern)?;
        fetch_missing(&recipe.sources)?;
        self.check_cancelled()?;

        {
            let mounts = self.mounts();
            let pkg_manager = self.pkg_manager.as_mut().ok_or(Error::NoRecipe)?;
            pkg_manager.init(&mounts)?;
            pkg_manager.start_dbus()?;
        }
        self.configure_repos()?;
        {
            let pkg_manager = self.pkg_manager.as_ref().ok_or(Error::NoRecipe)?;
            pkg_manager.upgrade()?;
            pkg_manager.install_component("system.devel")?;
        }
        self.check_cancelled()?;

        if recipe.kind == RecipeKind::Modern && !recipe.allow_network {
            namespaces::drop_networking()?;
            let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
            self.overlay
                .as_ref()
                .ok_or(Error::NoRecipe)?
                .configure_loopback(&executor)?;
        }

        let union = self.union()?;
        let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
        let (user, shell) = match recipe.kind {
            RecipeKind::Modern => (BUILD_USER, BUILD_USER_SHELL),
            _ => ("root", "/bin/bash"),
        };

        info!("spawning login shell");
        executor.run_interactive(&union, &format!("/bin/su - {user} -s {shell}"))
    }
}
