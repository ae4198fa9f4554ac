// src/error.rs

//! Central error type for solbuild
//!
//! Every failure path in the build core funnels through [`Error`] so that the
//! CLI can render one consistent message carrying the failing subsystem and,
//! where applicable, the offending path or pid.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("profile '{0}' is not installed")]
    ProfileNotInstalled(String),

    #[error("invalid backing image: {0}")]
    InvalidImage(String),

    #[error("no recipe has been set")]
    NoRecipe,

    #[error("malformed recipe {path}: {reason}")]
    MalformedRecipe { path: PathBuf, reason: String },

    #[error("unsupported source scheme: {0}")]
    UnsupportedSourceScheme(String),

    #[error("lockfile is owned by process {pid} ({exe})")]
    LockContention { pid: i32, exe: String },

    #[error("dead lockfile")]
    StaleLock,

    #[error("cannot release a lock we do not own")]
    NotOwner,

    #[error("failed to mount {what}: {reason}")]
    MountFailed { what: String, reason: String },

    #[error("failed to unmount {what}: {reason}")]
    UnmountFailed { what: String, reason: String },

    #[error("command '{cmd}' failed with status {status}")]
    ChildFailed { cmd: String, status: i32 },

    #[error("build completed but produced no packages")]
    NoArtifacts,

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("invalid transit manifest: {reason}")]
    ManifestInvalid { reason: String },

    #[error("manifest checksum mismatch for {path}: expected {expected}, got {actual}")]
    ManifestChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("i/o error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("xml encode error: {0}")]
    XmlEncode(String),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
}

impl Error {
    /// Wrap an i/o error with the path it occurred on
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
