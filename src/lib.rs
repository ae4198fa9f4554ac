// src/lib.rs

//! solbuild - a privileged package build driver
//!
//! solbuild builds distribution packages inside throwaway containers. For
//! each build it composes an overlayfs root over a read-only backing
//! image, provisions users and virtual filesystems, stages cached sources
//! and repositories via bind mounts, drives the in-container package
//! tooling over a private D-Bus, and collects the produced packages back
//! to the invoker.
//!
//! # Architecture
//!
//! - Session-first: one [`session::Session`] owns the whole lifecycle and
//!   guarantees teardown of children, mounts and locks
//! - Advisory on-disk locks carry live-process identity, so stale locks
//!   from killed builds are reclaimed automatically
//! - Namespaces: every run detaches mount+IPC at startup; builds that
//!   haven't opted into networking lose net+UTS before the build command
//! - Sources, package cache and ccache are host-side caches shared across
//!   builds and bind-mounted in

pub mod chroot;
pub mod config;
pub mod eopkg;
mod error;
pub mod hash;
pub mod history;
pub mod image;
pub mod lockfile;
pub mod manifest;
pub mod mounts;
pub mod namespaces;
pub mod overlay;
pub mod profile;
pub mod reaper;
pub mod recipe;
pub mod repos;
pub mod session;
pub mod source;
pub mod userinfo;
pub mod users;
pub mod util;

pub use config::GlobalConfig;
pub use error::{Error, Result};
pub use image::BackingImage;
pub use lockfile::Lockfile;
pub use manifest::TransitManifest;
pub use mounts::MountManager;
pub use overlay::Overlay;
pub use profile::Profile;
pub use recipe::{Recipe, RecipeKind};
pub use session::{LockKind, Session, SessionState};
pub use source::Source;
