// src/main.rs
//! solbuild - CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "solbuild")]
#[command(author = "Solbuild Contributors")]
#[command(version)]
#[command(about = "Solus package builder", long_about = None)]
struct Cli {
    /// Build profile to use
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Enable debug messages
    #[arg(short, long, global = true)]
    debug: bool,

    /// Disable colored output inside the container
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise a solbuild profile so it can be used for builds
    Init {
        /// Profile to initialise (defaults to the configured profile)
        profile_name: Option<String>,

        /// Run an update of the image after initialisation
        #[arg(short, long)]
        update: bool,
    },

    /// Build the given package in a chroot environment
    Build {
        /// Path to package.yml or pspec.xml
        recipe: Option<PathBuf>,

        /// Put the overlay upperdir on a tmpfs
        #[arg(short, long)]
        tmpfs: bool,

        /// Bounding size of the tmpfs, passed to mount (e.g. "16G")
        #[arg(short, long, default_value = "")]
        memory: String,

        /// Write a transit manifest for the named upload target
        #[arg(long)]
        transit_manifest: Option<String>,
    },

    /// Interactively chroot into the package's build environment
    Chroot {
        /// Path to package.yml or pspec.xml
        recipe: Option<PathBuf>,
    },

    /// Update the base image of the given profile
    Update {
        /// Profile whose image should be updated
        profile_name: Option<String>,
    },

    /// Create a repo index in the given directory
    Index {
        /// Directory to index (defaults to the current directory)
        dir: Option<PathBuf>,
    },

    /// Delete assets stored on disk by solbuild
    #[command(name = "delete-cache", alias = "dc")]
    DeleteCache {
        /// Also delete ccache, packages and sources
        #[arg(short, long)]
        all: bool,
    },

    /// Print the version and exit
    Version,
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("solbuild=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("solbuild=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let outcome: Result<()> = match cli.command {
        Some(Commands::Init {
            profile_name,
            update,
        }) => commands::cmd_init(resolve_profile(cli.profile, profile_name), update),

        Some(Commands::Build {
            recipe,
            tmpfs,
            memory,
            transit_manifest,
        }) => commands::cmd_build(
            cli.profile,
            recipe,
            tmpfs,
            memory,
            transit_manifest,
            cli.no_color,
        ),

        Some(Commands::Chroot { recipe }) => {
            commands::cmd_chroot(cli.profile, recipe, cli.no_color)
        }

        Some(Commands::Update { profile_name }) => {
            commands::cmd_update(resolve_profile(cli.profile, profile_name))
        }

        Some(Commands::Index { dir }) => commands::cmd_index(cli.profile, dir, cli.no_color),

        Some(Commands::DeleteCache { all }) => commands::cmd_delete_cache(all),

        Some(Commands::Version) | None => {
            println!("solbuild {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = outcome {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

/// A positional profile argument wins over the global --profile flag
fn resolve_profile(flag: Option<String>, positional: Option<String>) -> Option<String> {
    positional.or(flag)
}
