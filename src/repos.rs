// src/repos.rs

//! Repository configuration inside the build root
//!
//! A profile states which preconfigured repositories to strip from the
//! backing image, which of its own to enable, and whether any of those are
//! local directories to bind-mount in. The wildcard `*` means "all" in
//! both the removal list and the addition list; an empty addition list
//! also enables everything the profile declares.

use crate::chroot::ChrootExecutor;
use crate::eopkg::{EopkgManager, RepoEntry};
use crate::error::{Error, Result};
use crate::mounts::MountManager;
use crate::overlay::Overlay;
use crate::profile::{Profile, Repo, REPO_WILDCARD};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Where we make host repos available inside the container
pub const BIND_REPO_DIR: &str = "/hostRepos";

/// Decide which configured repos the profile wants gone
pub fn compute_removals(current: &[RepoEntry], remove_repos: &[String]) -> Vec<String> {
    if remove_repos.len() == 1 && remove_repos[0] == REPO_WILDCARD {
        current.iter().map(|r| r.id.clone()).collect()
    } else {
        remove_repos.to_vec()
    }
}

/// Decide which declared repos to enable, in declaration order
pub fn compute_additions(profile: &Profile) -> Vec<(String, Repo)> {
    let all = profile.add_repos.is_empty()
        || (profile.add_repos.len() == 1 && profile.add_repos[0] == REPO_WILDCARD);
    if all {
        profile
            .repos
            .iter()
            .map(|(name, repo)| (name.clone(), repo.clone()))
            .collect()
    } else {
        profile
            .add_repos
            .iter()
            .filter_map(|name| {
                profile
                    .repos
                    .get(name)
                    .map(|repo| (name.clone(), repo.clone()))
            })
            .collect()
    }
}

/// Apply the profile's repository policy to the root.
///
/// Removals happen first so a repo can be cleanly replaced by a local
/// variant under the same name.
pub fn configure(
    profile: &Profile,
    overlay: &mut Overlay,
    pkg_manager: &EopkgManager,
    executor: &ChrootExecutor,
    mounts: &MountManager,
) -> Result<()> {
    let current = pkg_manager.list_repos()?;

    for id in compute_removals(&current, &profile.remove_repos) {
        info!(name = %id, "removing repository");
        if let Err(e) = pkg_manager.remove_repo(&id) {
            // eopkg already errors politely when the repo isn't there
            warn!(name = %id, error = %e, "failed to remove repository");
        }
    }

    for (name, repo) in compute_additions(profile) {
        if repo.local {
            info!(name = %name, path = %repo.uri, "adding local repo to system");
            add_local_repo(&name, &repo, overlay, pkg_manager, executor, mounts)?;
        } else {
            info!(name = %name, uri = %repo.uri, "adding repo to system");
            pkg_manager.add_repo(&name, &repo.uri)?;
        }
    }
    Ok(())
}

/// Bind a host directory repo into the container and register it
fn add_local_repo(
    name: &str,
    repo: &Repo,
    overlay: &mut Overlay,
    pkg_manager: &EopkgManager,
    executor: &ChrootExecutor,
    mounts: &MountManager,
) -> Result<()> {
    let host_dir = Path::new(&repo.uri);
    if !host_dir.is_dir() {
        return Err(Error::InvalidProfile(format!(
            "local repo {name} does not exist: {}",
            repo.uri
        )));
    }

    let bind_base = BIND_REPO_DIR.trim_start_matches('/');
    let target = overlay.mount_point.join(bind_base).join(name);
    fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;

    mounts.bind(host_dir, &target, false)?;
    overlay.push_extra_mount(&target);

    if repo.autoindex {
        info!(name = %name, "reindexing repository");
        executor.run(
            &overlay.mount_point,
            &format!("cd {BIND_REPO_DIR}/{name} && eopkg index --skip-signing ."),
        )?;
    } else {
        let index = target.join("eopkg-index.xml.xz");
        if !index.exists() {
            warn!(name = %name, "repository index doesn't exist, please index it to use it");
        }
    }

    pkg_manager.add_repo(name, &format!("{BIND_REPO_DIR}/{name}/eopkg-index.xml.xz"))
}
