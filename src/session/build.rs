// src/session/build.rs

//! The build flow: prepare the root, run the packaging tool, collect
//! artifacts back to the invoker.

use super::{Session, CCACHE_DIR, LEGACY_CCACHE_DIR};
use crate::error::{Error, Result};
use crate::history::{self, PackageHistory, HISTORY_FILE};
use crate::manifest::TransitManifest;
use crate::namespaces;
use crate::overlay::ensure_eopkg_layout;
use crate::recipe::{Recipe, RecipeKind};
use crate::source::Source;
use crate::userinfo::UserInfo;
use crate::users::{self, BUILD_GROUP_ID, BUILD_USER, BUILD_USER_HOME, BUILD_USER_ID};
use crate::util;
use nix::unistd::{chown, getegid, geteuid, Gid, Uid};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// In-container work directory for the given recipe kind
pub(crate) fn work_dir_internal(kind: RecipeKind) -> PathBuf {
    match kind {
        RecipeKind::Modern => Path::new(BUILD_USER_HOME).join("work"),
        _ => PathBuf::from("/WORK"),
    }
}

/// In-container directory sources are staged into
fn source_dir_internal(kind: RecipeKind) -> PathBuf {
    match kind {
        RecipeKind::Modern => Path::new(BUILD_USER_HOME).join("YPKG/sources"),
        _ => PathBuf::from("/var/cache/eopkg/archives"),
    }
}

/// In-container ccache location
fn ccache_internal(kind: RecipeKind) -> PathBuf {
    match kind {
        RecipeKind::Modern => Path::new(BUILD_USER_HOME).join(".ccache"),
        _ => PathBuf::from("/root/.ccache"),
    }
}

/// Host-side ccache shared across builds of this kind
fn ccache_host(kind: RecipeKind) -> &'static str {
    match kind {
        RecipeKind::Modern => CCACHE_DIR,
        _ => LEGACY_CCACHE_DIR,
    }
}

/// Translate an in-container absolute path to its host-visible location
pub(crate) fn host_path(union: &Path, internal: &Path) -> PathBuf {
    union.join(internal.strip_prefix("/").unwrap_or(internal))
}

/// Fetch every source whose cached artifact is missing
pub(crate) fn fetch_missing(sources: &[Source]) -> Result<()> {
    for source in sources {
        if source.is_fetched() {
            debug!(source = source.identifier(), "source already cached");
            continue;
        }
        source.fetch()?;
    }
    Ok(())
}

/// The artifact owner: the sudo invoker when run under sudo, else ourselves
fn invoker_ids() -> (u32, u32) {
    let uid = env::var("SUDO_UID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| geteuid().as_raw());
    let gid = env::var("SUDO_GID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| getegid().as_raw());
    (uid, gid)
}

impl Session {
    /// Locked -> Active: run the full build flow for the bound recipe
    pub fn run_build(&mut self) -> Result<()> {
        self.mark_active()?;
        let recipe = self.recipe()?.clone();

        info!(
            package = %recipe.name,
            version = %recipe.version,
            release = recipe.release,
            kind = %recipe.kind,
            profile = %self.profile().name,
            "building package"
        );

        if let Some(overlay) = self.overlay_ref() {
            overlay.clean_existing()?;
        }
        self.check_cancelled()?;

        self.activate_root(recipe.kind == RecipeKind::Modern)?;
        self.check_cancelled()?;

        let history = self.copy_recipe_assets(&recipe)?;
        fetch_missing(&recipe.sources)?;
        self.check_cancelled()?;

        {
            let mounts = self.mounts();
            let pkg_manager = self.pkg_manager.as_mut().ok_or(Error::NoRecipe)?;
            pkg_manager.init(&mounts)?;
            debug!("starting d-bus");
            pkg_manager.start_dbus()?;
        }
        self.check_cancelled()?;

        self.configure_repos()?;
        self.check_cancelled()?;

        {
            let pkg_manager = self.pkg_manager.as_ref().ok_or(Error::NoRecipe)?;
            pkg_manager.upgrade()?;
            pkg_manager.install_component("system.devel")?;
        }
        self.check_cancelled()?;

        self.prepare_build_dirs(&recipe)?;
        self.check_cancelled()?;

        match recipe.kind {
            RecipeKind::Modern => self.build_modern(&recipe, history.as_ref())?,
            RecipeKind::Legacy => self.build_legacy(&recipe)?,
            RecipeKind::IndexStub => {
                return Err(Error::InvalidState(
                    "index stub cannot be built".to_string(),
                ))
            }
        }
        self.check_cancelled()?;

        self.collect_artifacts(&recipe)
    }

    /// Bring the root up: overlay mount, build user, virtual filesystems.
    /// The private namespace was entered at process start.
    pub(crate) fn activate_root(&mut self, add_build_user: bool) -> Result<()> {
        info!("configuring overlay storage");
        let mounts = self.mounts.clone();
        let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
        let overlay = self.overlay.as_mut().ok_or(Error::NoRecipe)?;

        overlay.ensure_dirs()?;
        overlay.mount(&mounts)?;

        if add_build_user {
            users::ensure_build_user(&executor, &overlay.mount_point)?;
        }

        info!("bringing up virtual filesystems");
        overlay.mount_vfs(&mounts)
    }

    /// Copy recipe-side assets into the in-container work directory.
    ///
    /// Returns the generated package history for Modern recipes, so the
    /// build command can pin its timestamps later.
    fn copy_recipe_assets(&mut self, recipe: &Recipe) -> Result<Option<PackageHistory>> {
        let union = self.union()?;
        let work_host = host_path(&union, &work_dir_internal(recipe.kind));
        fs::create_dir_all(&work_host).map_err(|e| Error::io(&work_host, e))?;

        let recipe_dir = recipe
            .path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let mut assets: Vec<PathBuf> = vec![recipe.path.clone()];
        for extra in ["files", "comar"] {
            assets.push(recipe_dir.join(extra));
        }
        if recipe.kind == RecipeKind::Legacy {
            assets.push(recipe_dir.join("actions.py"));
        }

        for asset in assets {
            if !asset.exists() {
                continue;
            }
            util::copy_all(&asset, &work_host)?;
        }

        match recipe.kind {
            RecipeKind::Legacy => {
                // eopkg expects component.xml one level above the spec
                let component = recipe_dir.join("component.xml");
                if component.exists() {
                    let parent = work_host
                        .parent()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_else(|| union.clone());
                    util::copy_all(&component, &parent)?;
                }
                Ok(None)
            }
            RecipeKind::Modern => {
                let packager = host_path(&union, Path::new(BUILD_USER_HOME))
                    .join(".solus/packager");
                UserInfo::discover().write_packager(&packager)?;

                let history = history::for_recipe(recipe)?;
                if let Some(history) = history.as_ref() {
                    history.write(&work_host.join(HISTORY_FILE))?;
                }
                Ok(history)
            }
            RecipeKind::IndexStub => Ok(None),
        }
    }

    /// Apply the profile's repository policy inside the root
    pub(crate) fn configure_repos(&mut self) -> Result<()> {
        let mounts = self.mounts.clone();
        let profile = self.profile.as_ref().expect("configured session").clone();
        let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
        let overlay = self.overlay.as_mut().ok_or(Error::NoRecipe)?;
        let pkg_manager = self.pkg_manager.as_ref().ok_or(Error::NoRecipe)?;
        crate::repos::configure(&profile, overlay, pkg_manager, &executor, &mounts)
    }

    /// Create the per-recipe work/source/ccache directories with the right
    /// ownership: the build user for Modern recipes, root otherwise.
    fn prepare_build_dirs(&mut self, recipe: &Recipe) -> Result<()> {
        let union = self.union()?;
        for internal in [
            work_dir_internal(recipe.kind),
            source_dir_internal(recipe.kind),
            ccache_internal(recipe.kind),
        ] {
            let host = host_path(&union, &internal);
            fs::create_dir_all(&host).map_err(|e| Error::io(&host, e))?;
            if recipe.kind == RecipeKind::Modern {
                chown(
                    &host,
                    Some(Uid::from_raw(BUILD_USER_ID)),
                    Some(Gid::from_raw(BUILD_GROUP_ID)),
                )?;
            }
        }
        Ok(())
    }

    /// Bind every recipe source read-only into the container stage dir
    pub(crate) fn stage_sources(&mut self, recipe: &Recipe) -> Result<()> {
        let union = self.union()?;
        let mounts = self.mounts.clone();
        let stage_host = host_path(&union, &source_dir_internal(recipe.kind));
        fs::create_dir_all(&stage_host).map_err(|e| Error::io(&stage_host, e))?;

        let overlay = self.overlay.as_mut().ok_or(Error::NoRecipe)?;
        for source in &recipe.sources {
            let pair = source.bind_pair(&stage_host);
            if pair.host_path.is_dir() {
                fs::create_dir_all(&pair.container_path)
                    .map_err(|e| Error::io(&pair.container_path, e))?;
            } else {
                crate::mounts::touch(&pair.container_path)?;
            }
            mounts.bind(&pair.host_path, &pair.container_path, true)?;
            overlay.push_extra_mount(&pair.container_path);
        }
        Ok(())
    }

    /// Bind the shared compiler cache, writable, into the container
    fn bind_ccache(&mut self, recipe: &Recipe) -> Result<()> {
        let union = self.union()?;
        let mounts = self.mounts.clone();
        let host = PathBuf::from(ccache_host(recipe.kind));
        fs::create_dir_all(&host).map_err(|e| Error::io(&host, e))?;

        let target = host_path(&union, &ccache_internal(recipe.kind));
        fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;

        debug!(target = %target.display(), "binding ccache");
        mounts.bind(&host, &target, false)?;
        let overlay = self.overlay.as_mut().ok_or(Error::NoRecipe)?;
        overlay.push_extra_mount(&target);
        Ok(())
    }

    /// The ypkg flow: install build deps as root, drop privileges and
    /// (usually) the network, then hand over to ypkg-build via fakeroot.
    fn build_modern(&mut self, recipe: &Recipe, history: Option<&PackageHistory>) -> Result<()> {
        let union = self.union()?;
        let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
        let work_internal = work_dir_internal(recipe.kind);
        let yml_internal = work_internal.join(recipe.path.file_name().unwrap_or_default());

        info!(build_file = %yml_internal.display(), "installing build dependencies");
        executor.run(
            &union,
            &format!("ypkg-install-deps -f {}", yml_internal.display()),
        )?;
        self.check_cancelled()?;

        debug!("stopping d-bus");
        self.pkg_manager
            .as_mut()
            .ok_or(Error::NoRecipe)?
            .stop_dbus()?;

        // The whole home must belong to the build user before su
        let home_host = host_path(&union, Path::new(BUILD_USER_HOME));
        util::chown_all(&home_host, BUILD_USER_ID, BUILD_GROUP_ID)?;

        if !recipe.allow_network {
            namespaces::drop_networking()?;
            let overlay = self.overlay.as_ref().ok_or(Error::NoRecipe)?;
            overlay.configure_loopback(&executor)?;
        } else {
            warn!("build has explicitly requested networking");
        }

        self.stage_sources(recipe)?;
        ensure_eopkg_layout(&union)?;
        self.bind_ccache(recipe)?;
        self.pkg_manager
            .as_ref()
            .ok_or(Error::NoRecipe)?
            .copy_assets()?;
        self.check_cancelled()?;

        let mut command = format!(
            "su {BUILD_USER} -- fakeroot ypkg-build -D {} {}",
            work_internal.display(),
            yml_internal.display()
        );
        if self.disable_colors {
            command.push_str(" -n");
        }
        if let Some(stamp) = history.and_then(|h| h.last_update_time()) {
            command.push_str(&format!(" -t {stamp}"));
        }

        info!(package = %recipe.name, "now building the package");
        executor.run(&union, &command)
    }

    /// The legacy flow: eopkg builds as root, sandboxing stays limited
    fn build_legacy(&mut self, recipe: &Recipe) -> Result<()> {
        warn!("full sandboxing is not possible with the legacy format");
        let union = self.union()?;
        let executor = self.executor.clone().ok_or(Error::NoRecipe)?;
        let work_internal = work_dir_internal(recipe.kind);
        let xml_internal = work_internal.join(recipe.path.file_name().unwrap_or_default());

        self.stage_sources(recipe)?;
        self.bind_ccache(recipe)?;
        self.pkg_manager
            .as_ref()
            .ok_or(Error::NoRecipe)?
            .copy_assets()?;
        self.check_cancelled()?;

        info!(package = %recipe.name, "now building the package");
        executor.run(
            &union,
            &format!(
                "eopkg build --ignore-sandbox --yes-all -O {} {}",
                work_internal.display(),
                xml_internal.display()
            ),
        )?;

        debug!("stopping d-bus");
        self.pkg_manager
            .as_mut()
            .ok_or(Error::NoRecipe)?
            .stop_dbus()
    }

    /// Copy built packages (and, for Modern, the emitted pspec files) into
    /// the invoker's working directory, restoring their ownership.
    fn collect_artifacts(&mut self, recipe: &Recipe) -> Result<()> {
        let union = self.union()?;
        let work_host = host_path(&union, &work_dir_internal(recipe.kind));

        let mut packages: Vec<PathBuf> = Vec::new();
        let mut extras: Vec<PathBuf> = Vec::new();
        let entries = fs::read_dir(&work_host).map_err(|e| Error::io(&work_host, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&work_host, e))?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".eopkg") {
                packages.push(path);
            } else if recipe.kind == RecipeKind::Modern
                && name.starts_with("pspec_")
                && name.ends_with(".xml")
            {
                extras.push(path);
            }
        }
        if packages.is_empty() {
            return Err(Error::NoArtifacts);
        }
        packages.sort();
        extras.sort();

        let cwd = env::current_dir().map_err(|e| Error::io(".", e))?;
        let (uid, gid) = invoker_ids();
        let mut collected = Vec::new();

        for artifact in packages.iter().chain(extras.iter()) {
            let name = artifact.file_name().unwrap_or_default();
            let dest = cwd.join(name);
            info!(artifact = %dest.display(), "collecting build artifact");
            fs::copy(artifact, &dest).map_err(|e| Error::io(&dest, e))?;
            chown(&dest, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
            if artifact.extension().is_some_and(|e| e == "eopkg") {
                collected.push(dest);
            }
        }

        if let Some(target) = self.manifest_target.clone() {
            let mut manifest = TransitManifest::new(&target);
            for package in &collected {
                manifest.add_file(package)?;
            }
            let tram = cwd.join(format!(
                "{}-{}-{}.tram",
                recipe.name, recipe.version, recipe.release
            ));
            info!(manifest = %tram.display(), "writing transit manifest");
            manifest.write(&tram)?;
            chown(&tram, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
        }
        Ok(())
    }

    pub(crate) fn union(&self) -> Result<PathBuf> {
        self.overlay
            .as_ref()
            .map(|o| o.mount_point.clone())
            .ok_or(Error::NoRecipe)
    }

    fn overlay_ref(&self) -> Option<&crate::overlay::Overlay> {
        self.overlay.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_dirs_by_kind() {
        assert_eq!(
            work_dir_internal(RecipeKind::Modern),
            Path::new("/home/build/work")
        );
        assert_eq!(work_dir_internal(RecipeKind::Legacy), Path::new("/WORK"));
    }

    #[test]
    fn test_source_dirs_by_kind() {
        assert_eq!(
            source_dir_internal(RecipeKind::Modern),
            Path::new("/home/build/YPKG/sources")
        );
        assert_eq!(
            source_dir_internal(RecipeKind::Legacy),
            Path::new("/var/cache/eopkg/archives")
        );
    }

    #[test]
    fn test_host_path_stays_under_union() {
        let union = Path::new("/var/cache/solbuild/main/nano/union");
        let host = host_path(union, Path::new("/home/build/work"));
        assert!(host.starts_with(union));
        assert_eq!(host, union.join("home/build/work"));
    }

    #[test]
    fn test_ccache_paths() {
        assert_eq!(ccache_host(RecipeKind::Modern), CCACHE_DIR);
        assert_eq!(ccache_host(RecipeKind::Legacy), LEGACY_CCACHE_DIR);
        assert_eq!(
            ccache_internal(RecipeKind::Legacy),
            Path::new("/root/.ccache")
        );
    }
}
