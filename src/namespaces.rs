// src/namespaces.rs

//! Linux namespace control for the build container
//!
//! The process detaches its mount and IPC namespaces once, at startup,
//! before the first mount is performed. Networking (plus UTS) is dropped
//! separately, immediately before the build command runs, so that recipes
//! which haven't opted into networking cannot reach anything beyond
//! loopback.

use crate::error::Result;
use nix::sched::{unshare, CloneFlags};
use tracing::debug;

/// Detach the mount and IPC namespaces from the parent.
///
/// Must run exactly once, before any mount is performed; every mount made
/// afterwards is invisible to the host.
pub fn enter_private_ns() -> Result<()> {
    debug!("configuring container namespace");
    unshare(CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWIPC)?;
    Ok(())
}

/// Detach the network and UTS namespaces.
///
/// After this call the only usable interface is the loopback device, and
/// only once it has been brought up inside the container.
pub fn drop_networking() -> Result<()> {
    debug!("dropping container networking");
    unshare(CloneFlags::CLONE_NEWNET | CloneFlags::CLONE_NEWUTS)?;
    Ok(())
}
