// src/chroot.rs

//! Chroot command execution with a sanitized environment
//!
//! Every command run inside the build root goes through here: package
//! manager verbs, repo indexing, the build itself. The child is spawned as
//! `chroot <dir> /bin/sh -c <command>` in its own session group so that a
//! cancel can kill the whole process tree, and its pid is reported to the
//! session before we block in `wait`.

use crate::error::{Error, Result};
use std::env;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::debug;

/// Receives the pid of the currently-running chroot child, so the session
/// can kill it on cancel. Cleared back to 0 once the child is reaped.
pub trait PidNotifier: Send + Sync {
    fn set_active_pid(&self, pid: i32);
}

/// A no-op notifier for callers without a session (e.g. tests)
pub struct NullNotifier;

impl PidNotifier for NullNotifier {
    fn set_active_pid(&self, _pid: i32) {}
}

/// Environment keys passed through from the host when present, in both
/// lower and upper case.
const PASSTHROUGH_KEYS: &[&str] = &["http_proxy", "https_proxy", "no_proxy", "ftp_proxy", "TERM"];

/// Build the sanitized environment for in-container commands.
///
/// Only a fixed allowlist survives, plus proxy/TERM passthrough. When color
/// output is globally disabled, TERM is pinned to `dumb` regardless of the
/// host value.
pub fn sane_environment(user: &str, home: &str, disable_colors: bool) -> Vec<(String, String)> {
    let mut environment = vec![
        (
            "PATH".to_string(),
            "/usr/bin:/usr/sbin:/bin:/sbin".to_string(),
        ),
        ("LANG".to_string(), "C".to_string()),
        ("LC_ALL".to_string(), "C".to_string()),
        ("HOME".to_string(), home.to_string()),
        ("USER".to_string(), user.to_string()),
        ("USERNAME".to_string(), user.to_string()),
    ];

    for key in PASSTHROUGH_KEYS {
        for variant in [key.to_lowercase(), key.to_uppercase()] {
            if let Ok(value) = env::var(&variant) {
                environment.push((variant, value));
            }
        }
    }

    if disable_colors {
        environment.retain(|(k, _)| !k.eq_ignore_ascii_case("term"));
        environment.push(("TERM".to_string(), "dumb".to_string()));
    }

    environment
}

/// Spawns commands inside a prepared root
#[derive(Clone)]
pub struct ChrootExecutor {
    environment: Vec<(String, String)>,
    notifier: Arc<dyn PidNotifier>,
}

impl ChrootExecutor {
    pub fn new(environment: Vec<(String, String)>, notifier: Arc<dyn PidNotifier>) -> Self {
        Self {
            environment,
            notifier,
        }
    }

    /// Run `command` through `/bin/sh -c` inside `dir`, with stdout/stderr
    /// inherited and stdin closed.
    pub fn run(&self, dir: &Path, command: &str) -> Result<()> {
        self.spawn_and_wait(dir, command, Stdio::null())
    }

    /// As [`run`](Self::run), but with the host's stdin attached so
    /// interactive shells work.
    pub fn run_interactive(&self, dir: &Path, command: &str) -> Result<()> {
        self.spawn_and_wait(dir, command, Stdio::inherit())
    }

    fn spawn_and_wait(&self, dir: &Path, command: &str, stdin: Stdio) -> Result<()> {
        debug!(dir = %dir.display(), command, "chroot exec");

        let mut child = Command::new("chroot")
            .arg(dir)
            .arg("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(stdin)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .env_clear()
            .envs(self.environment.iter().map(|(k, v)| (k, v)))
            // Own session group, so a cancel can nuke all descendants
            .process_group(0)
            .spawn()
            .map_err(|e| Error::io(dir, e))?;

        self.notifier.set_active_pid(child.id() as i32);
        let status = child.wait().map_err(|e| Error::io(dir, e));
        self.notifier.set_active_pid(0);

        let status = status?;
        if !status.success() {
            return Err(Error::ChildFailed {
                cmd: command.to_string(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_sane_environment_allowlist() {
        let env = sane_environment("build", "/home/build", false);
        assert_eq!(lookup(&env, "LANG"), Some("C"));
        assert_eq!(lookup(&env, "LC_ALL"), Some("C"));
        assert_eq!(lookup(&env, "HOME"), Some("/home/build"));
        assert_eq!(lookup(&env, "USER"), Some("build"));
        assert_eq!(lookup(&env, "USERNAME"), Some("build"));
        assert!(lookup(&env, "PATH").is_some());
        // Nothing else from the host leaks through
        assert!(lookup(&env, "CARGO_MANIFEST_DIR").is_none());
    }

    #[test]
    fn test_sane_environment_proxy_passthrough() {
        env::set_var("ftp_proxy", "http://proxy.example:3128");
        let env_vars = sane_environment("root", "/root", false);
        assert_eq!(
            lookup(&env_vars, "ftp_proxy"),
            Some("http://proxy.example:3128")
        );
        env::remove_var("ftp_proxy");
    }

    #[test]
    fn test_sane_environment_dumb_term() {
        env::set_var("TERM", "xterm-256color");
        let env_vars = sane_environment("root", "/root", true);
        assert_eq!(lookup(&env_vars, "TERM"), Some("dumb"));
        assert!(!env_vars
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-256color"));
        env::remove_var("TERM");
    }
}
