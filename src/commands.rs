// src/commands.rs
//! Command handlers for the solbuild CLI

use anyhow::{bail, Context, Result};
use solbuild::eopkg::PACKAGE_CACHE_DIR;
use solbuild::overlay::OVERLAY_ROOT_DIR;
use solbuild::session::{LockKind, Session, CCACHE_DIR, LEGACY_CCACHE_DIR};
use solbuild::source::SOURCE_DIR;
use solbuild::{namespaces, BackingImage, GlobalConfig, Profile, Recipe};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Recipe files probed when no argument was given
const LIKELY_RECIPES: &[&str] = &["package.yml", "pspec.xml"];

fn require_root(action: &str) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        bail!("you must be root to {action}");
    }
    Ok(())
}

/// Pick the recipe argument, or probe the working directory for one
fn resolve_recipe(recipe: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(recipe) = recipe {
        return Ok(recipe);
    }
    for candidate in LIKELY_RECIPES {
        if Path::new(candidate).exists() {
            return Ok(PathBuf::from(candidate));
        }
    }
    bail!("require a recipe file to operate on");
}

fn profile_name(config: &GlobalConfig, requested: Option<String>) -> String {
    requested.unwrap_or_else(|| config.default_profile.clone())
}

/// `solbuild init`: fetch and decompress the profile's backing image
pub fn cmd_init(requested: Option<String>, update: bool) -> Result<()> {
    require_root("init a profile")?;
    let config = GlobalConfig::load()?;
    let name = profile_name(&config, requested);
    let profile = Profile::load(&name)?;
    let image = BackingImage::new(&profile.image);

    if image.is_installed() {
        info!(profile = %name, "profile is already initialised");
    } else {
        if !image.is_fetched() {
            image.fetch()?;
        }
        image.decompress()?;
        info!(profile = %name, "profile successfully initialised");
    }

    if update {
        return cmd_update(Some(name));
    }
    Ok(())
}

/// `solbuild build`: run a full build session for one recipe
pub fn cmd_build(
    requested: Option<String>,
    recipe: Option<PathBuf>,
    tmpfs: bool,
    memory: String,
    transit_manifest: Option<String>,
    no_color: bool,
) -> Result<()> {
    require_root("build packages")?;
    let recipe_path = resolve_recipe(recipe)?;
    let recipe = Recipe::load(&recipe_path)
        .with_context(|| format!("failed to load recipe {}", recipe_path.display()))?;
    let config = GlobalConfig::load()?;
    let name = profile_name(&config, requested);

    println!(
        "Building (profile: {name}): {} ({}-{})",
        recipe.name, recipe.version, recipe.release
    );

    // The namespace must be private before the first mount happens
    namespaces::enter_private_ns()?;

    let mut session = Session::new(config);
    session.disable_colors = no_color;
    session.manifest_target = transit_manifest;
    session.configure(&name)?;
    session.set_recipe(recipe)?;
    session.override_tmpfs(tmpfs, memory);
    session.install_interrupt_handler()?;

    let result = session
        .acquire(LockKind::Overlay)
        .and_then(|_| session.run_build());
    session.teardown();
    result?;
    info!("build complete");
    Ok(())
}

/// `solbuild chroot`: interactive shell in the build environment
pub fn cmd_chroot(
    requested: Option<String>,
    recipe: Option<PathBuf>,
    no_color: bool,
) -> Result<()> {
    require_root("chroot into a build environment")?;
    let recipe_path = resolve_recipe(recipe)?;
    let recipe = Recipe::load(&recipe_path)
        .with_context(|| format!("failed to load recipe {}", recipe_path.display()))?;
    let config = GlobalConfig::load()?;
    let name = profile_name(&config, requested);

    namespaces::enter_private_ns()?;

    let mut session = Session::new(config);
    session.disable_colors = no_color;
    session.configure(&name)?;
    session.set_recipe(recipe)?;
    session.install_interrupt_handler()?;

    let result = session
        .acquire(LockKind::Overlay)
        .and_then(|_| session.run_chroot());
    session.teardown();
    result?;
    Ok(())
}

/// `solbuild update`: refresh the base image in place
pub fn cmd_update(requested: Option<String>) -> Result<()> {
    require_root("update a profile image")?;
    let config = GlobalConfig::load()?;
    let name = profile_name(&config, requested);

    namespaces::enter_private_ns()?;

    let mut session = Session::new(config);
    session.configure(&name)?;
    session.install_interrupt_handler()?;

    let result = session
        .acquire(LockKind::Image)
        .and_then(|_| session.run_update());
    session.teardown();
    result?;
    info!(profile = %name, "update complete");
    Ok(())
}

/// `solbuild index`: build a repo index inside the container
pub fn cmd_index(
    requested: Option<String>,
    dir: Option<PathBuf>,
    no_color: bool,
) -> Result<()> {
    require_root("index a repository")?;
    let config = GlobalConfig::load()?;
    let name = profile_name(&config, requested);
    let dir = dir.unwrap_or_else(|| PathBuf::from("."));

    namespaces::enter_private_ns()?;

    let mut session = Session::new(config);
    session.disable_colors = no_color;
    session.configure(&name)?;
    session.set_recipe(Recipe::index_stub())?;
    session.install_interrupt_handler()?;

    let result = session
        .acquire(LockKind::Overlay)
        .and_then(|_| session.run_index(&dir));
    session.teardown();
    result?;
    info!("indexing complete");
    Ok(())
}

/// `solbuild delete-cache`: drop the build roots and, with --all, every
/// shared cache as well
pub fn cmd_delete_cache(all: bool) -> Result<()> {
    require_root("delete caches")?;

    let mut targets: Vec<&str> = vec![OVERLAY_ROOT_DIR];
    if all {
        targets.extend([CCACHE_DIR, LEGACY_CCACHE_DIR, PACKAGE_CACHE_DIR, SOURCE_DIR]);
    }

    for target in targets {
        let path = Path::new(target);
        if !path.exists() {
            continue;
        }
        info!(dir = %path.display(), "removing cache directory");
        fs::remove_dir_all(path)
            .with_context(|| format!("could not remove cache directory {target}"))?;
    }
    Ok(())
}
