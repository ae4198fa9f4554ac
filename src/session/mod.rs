// src/session/mod.rs

//! The build session state machine
//!
//! A session ties a profile, a backing image, an overlay and a recipe
//! together and walks them through a fixed lifecycle:
//!
//! ```text
//! New -> Configured -> Packaged -> Locked -> Active -> TearingDown -> Done
//! ```
//!
//! Whatever happens mid-flight (completion, error, SIGINT), teardown runs
//! exactly once and releases children, mounts and locks in that order.
//! Cancellation is cooperative: the SIGINT handler only raises a flag; a
//! watcher thread kills the active chroot child so blocking waits return,
//! and every step boundary checks the flag before doing more work.

mod build;
mod chroot;
mod index;
mod update;

use crate::chroot::{sane_environment, ChrootExecutor, PidNotifier};
use crate::config::GlobalConfig;
use crate::eopkg::EopkgManager;
use crate::error::{Error, Result};
use crate::image::BackingImage;
use crate::lockfile::Lockfile;
use crate::mounts::MountManager;
use crate::overlay::Overlay;
use crate::profile::Profile;
use crate::reaper;
use crate::recipe::{Recipe, RecipeKind};
use crate::users::{BUILD_USER, BUILD_USER_HOME};
use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Host-side compiler cache for ypkg builds
pub const CCACHE_DIR: &str = "/var/lib/solbuild/ccache/ypkg";

/// Host-side compiler cache for legacy builds
pub const LEGACY_CCACHE_DIR: &str = "/var/lib/solbuild/ccache/legacy";

/// Maximum passes the teardown reaper makes over /proc
const REAP_ITERATIONS: usize = 10;

/// Grace period between the two kill volleys aimed at the active child
const CHILD_KILL_GRACE: Duration = Duration::from_secs(2);

/// Set from the SIGINT handler; observed by the watcher thread
static CANCEL_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_interrupt(_signo: libc::c_int) {
    CANCEL_REQUESTED.store(true, Ordering::SeqCst);
}

/// Lifecycle states of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Configured,
    Packaged,
    Locked,
    Active,
    TearingDown,
    Done,
}

/// Which lockfile a session should take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// The per-recipe overlay lock, for build/chroot/index
    Overlay,
    /// The per-image lock, for update
    Image,
}

/// State shared with the signal watcher, behind the session mutex
#[derive(Debug, Default)]
pub struct SessionShared {
    pub cancelled: bool,
    /// pid of the running chroot child, 0 when none
    pub active_pid: i32,
}

/// Adapter handing the active child pid from the executor to the session
#[derive(Clone)]
pub struct SessionNotifier(Arc<Mutex<SessionShared>>);

impl PidNotifier for SessionNotifier {
    fn set_active_pid(&self, pid: i32) {
        self.0.lock().unwrap().active_pid = pid;
    }
}

/// A Session cleanly manages one build/chroot/update/index operation,
/// i.e. setup, execution and teardown.
pub struct Session {
    state: SessionState,
    config: GlobalConfig,
    profile: Option<Profile>,
    image: Option<BackingImage>,
    recipe: Option<Recipe>,
    overlay: Option<Overlay>,
    pkg_manager: Option<EopkgManager>,
    lockfile: Option<Lockfile>,
    mounts: MountManager,
    shared: Arc<Mutex<SessionShared>>,
    executor: Option<ChrootExecutor>,
    /// Disable colored/interactive output inside the container
    pub disable_colors: bool,
    /// Write a transit manifest for this upload target after a build
    pub manifest_target: Option<String>,
    started: bool,
    update_mode: bool,
}

impl Session {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            state: SessionState::New,
            config,
            profile: None,
            image: None,
            recipe: None,
            overlay: None,
            pkg_manager: None,
            lockfile: None,
            mounts: MountManager::new(),
            shared: Arc::new(Mutex::new(SessionShared::default())),
            executor: None,
            disable_colors: false,
            manifest_target: None,
            started: false,
            update_mode: false,
        }
    }

    /// New -> Configured: resolve the profile and check its image is usable
    pub fn configure(&mut self, profile_name: &str) -> Result<()> {
        self.expect_state(SessionState::New)?;
        let profile = Profile::load(profile_name)?;
        let image = BackingImage::new(&profile.image);
        if !image.is_installed() {
            return Err(Error::ProfileNotInstalled(profile_name.to_string()));
        }
        self.profile = Some(profile);
        self.image = Some(image);
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Configured -> Packaged: bind a recipe, instantiate overlay and
    /// package manager
    pub fn set_recipe(&mut self, recipe: Recipe) -> Result<()> {
        self.expect_state(SessionState::Configured)?;
        let profile = self.profile.as_ref().expect("configured session");
        let image = self.image.as_ref().expect("configured session");

        let mut overlay = Overlay::new(&profile.name, image, &recipe);
        overlay.enable_tmpfs = self.config.enable_tmpfs;
        overlay.tmpfs_size = self.config.tmpfs_size.clone();

        // Root runs everything except the ypkg build itself; the build
        // flow swaps in the build user via su.
        let environment = match recipe.kind {
            RecipeKind::Modern => {
                sane_environment(BUILD_USER, BUILD_USER_HOME, self.disable_colors)
            }
            _ => sane_environment("root", "/root", self.disable_colors),
        };
        let executor = ChrootExecutor::new(environment, Arc::new(self.notifier()));
        self.pkg_manager = Some(EopkgManager::new(&overlay.mount_point, executor.clone()));
        self.executor = Some(executor);
        self.overlay = Some(overlay);
        self.recipe = Some(recipe);
        self.state = SessionState::Packaged;
        Ok(())
    }

    /// Enable tmpfs-backed builds, overriding the global configuration
    pub fn override_tmpfs(&mut self, enable: bool, size: String) {
        self.config.enable_tmpfs = self.config.enable_tmpfs || enable;
        if !size.is_empty() {
            self.config.tmpfs_size = size;
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.enable_tmpfs = self.config.enable_tmpfs;
            overlay.tmpfs_size = self.config.tmpfs_size.clone();
        }
    }

    /// Packaged -> Locked: take the on-disk lock for the resource we're
    /// about to chew on.
    pub fn acquire(&mut self, kind: LockKind) -> Result<()> {
        let lock_path = match kind {
            LockKind::Overlay => {
                self.expect_state(SessionState::Packaged)?;
                let overlay = self.overlay.as_ref().ok_or(Error::NoRecipe)?;
                overlay.lock_path.clone()
            }
            LockKind::Image => {
                // Update sessions carry no recipe, so Configured suffices
                if !matches!(
                    self.state,
                    SessionState::Configured | SessionState::Packaged
                ) {
                    return Err(Error::InvalidState(format!(
                        "cannot lock image from {:?}",
                        self.state
                    )));
                }
                let image = self.image.as_ref().expect("configured session");
                self.update_mode = true;
                image.lock_path.clone()
            }
        };
        let mut lockfile = Lockfile::open(&lock_path)?;
        lockfile.acquire()?;
        self.lockfile = Some(lockfile);
        self.started = true;
        self.state = SessionState::Locked;
        Ok(())
    }

    /// Register the SIGINT handler and spawn the cancel watcher.
    ///
    /// The watcher owns exactly one job: once an interrupt is seen, flip
    /// the shared cancelled flag and keep killing whatever chroot child is
    /// active so the main flow's blocking wait returns. Teardown stays on
    /// the main flow at the next step boundary.
    pub fn install_interrupt_handler(&self) -> Result<()> {
        let action = SigAction::new(
            SigHandler::Handler(handle_interrupt),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGINT, &action) }?;

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || loop {
            if CANCEL_REQUESTED.load(Ordering::SeqCst) {
                let pid = {
                    let mut guard = shared.lock().unwrap();
                    if !guard.cancelled {
                        warn!("interrupt received, cleaning up");
                    }
                    guard.cancelled = true;
                    guard.active_pid
                };
                if pid > 0 {
                    // Whole session group, so descendants die with it
                    let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
                }
            }
            thread::sleep(Duration::from_millis(50));
        });
        Ok(())
    }

    /// Observable, cooperative cancellation state
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().unwrap().cancelled
    }

    /// Step-boundary guard: error out when a cancel came in
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn notifier(&self) -> SessionNotifier {
        SessionNotifier(Arc::clone(&self.shared))
    }

    pub(crate) fn mounts(&self) -> MountManager {
        self.mounts.clone()
    }

    pub(crate) fn expect_state(&self, wanted: SessionState) -> Result<()> {
        if self.state != wanted {
            return Err(Error::InvalidState(format!(
                "session in state {:?}, expected {wanted:?}",
                self.state
            )));
        }
        Ok(())
    }

    pub(crate) fn mark_active(&mut self) -> Result<()> {
        self.expect_state(SessionState::Locked)?;
        self.state = SessionState::Active;
        Ok(())
    }

    /// Tear the whole session down. Always safe to call, runs its work at
    /// most once, and best-effort continues past individual failures.
    pub fn teardown(&mut self) {
        if matches!(self.state, SessionState::TearingDown | SessionState::Done) {
            return;
        }
        self.state = SessionState::TearingDown;
        info!("tearing down session");

        let mounts = self.mounts.clone();

        if let Some(pkg_manager) = self.pkg_manager.as_mut() {
            pkg_manager.cleanup(&mounts);
        }

        // Kill the active child before releasing anything it may hold open
        let pid = self.shared.lock().unwrap().active_pid;
        if pid > 0 {
            let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
            thread::sleep(CHILD_KILL_GRACE);
            let _ = kill(Pid::from_raw(-pid), Signal::SIGKILL);
        }

        if let Some(overlay) = self.overlay.as_mut() {
            // Nothing may keep a cwd inside the overlay while we unmount
            for _ in 0..REAP_ITERATIONS {
                match reaper::reap(&overlay.mount_point) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
            if let Err(e) = overlay.unmount(&mounts) {
                warn!(error = %e, "error unmounting overlay");
            }
        }

        info!("requesting unmount of all remaining mountpoints");
        mounts.unmount_all();

        if let Some(lockfile) = self.lockfile.as_mut() {
            if lockfile.is_owner() {
                if let Err(e) = lockfile.clean() {
                    warn!(error = %e, "failed to clean lockfile");
                }
            }
        }

        self.state = SessionState::Done;
    }

    pub(crate) fn recipe(&self) -> Result<&Recipe> {
        self.recipe.as_ref().ok_or(Error::NoRecipe)
    }

    pub(crate) fn profile(&self) -> &Profile {
        self.profile.as_ref().expect("configured session")
    }

    pub(crate) fn image(&self) -> &BackingImage {
        self.image.as_ref().expect("configured session")
    }

    /// Whether this session holds the image lock rather than an overlay one
    pub fn is_update(&self) -> bool {
        self.update_mode
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.started {
            self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_state() {
        let session = Session::new(GlobalConfig::default());
        assert_eq!(session.state(), SessionState::New);
        assert!(!session.is_cancelled());
    }

    #[test]
    fn test_configure_unknown_profile() {
        let mut session = Session::new(GlobalConfig::default());
        assert!(session.configure("no-such-profile-exists").is_err());
        assert_eq!(session.state(), SessionState::New);
    }

    #[test]
    fn test_set_recipe_requires_configured() {
        let mut session = Session::new(GlobalConfig::default());
        assert!(session.set_recipe(Recipe::index_stub()).is_err());
    }

    #[test]
    fn test_teardown_on_fresh_session_is_safe() {
        let mut session = Session::new(GlobalConfig::default());
        session.teardown();
        session.teardown();
        assert_eq!(session.state(), SessionState::Done);
        assert!(session.mounts.is_empty());
    }

    #[test]
    fn test_notifier_updates_shared_pid() {
        let session = Session::new(GlobalConfig::default());
        let notifier = session.notifier();
        notifier.set_active_pid(4242);
        assert_eq!(session.shared.lock().unwrap().active_pid, 4242);
        notifier.set_active_pid(0);
        assert_eq!(session.shared.lock().unwrap().active_pid, 0);
    }
}
