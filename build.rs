// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: build profile
fn profile_arg() -> Arg {
    Arg::new("profile")
        .short('p')
        .long("profile")
        .value_name("NAME")
        .help("Build profile to use")
}

fn build_cli() -> Command {
    Command::new("solbuild")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Solbuild Contributors")
        .about("Solus package builder")
        .arg(profile_arg().global(true))
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug messages"),
        )
        .subcommand(
            Command::new("init")
                .about("Initialise a solbuild profile")
                .arg(Arg::new("profile_name").help("Profile to initialise"))
                .arg(
                    Arg::new("update")
                        .short('u')
                        .long("update")
                        .action(ArgAction::SetTrue)
                        .help("Run an update after initialisation"),
                ),
        )
        .subcommand(
            Command::new("build")
                .about("Build the given package in a chroot environment")
                .arg(Arg::new("recipe").help("Path to package.yml or pspec.xml"))
                .arg(
                    Arg::new("tmpfs")
                        .short('t')
                        .long("tmpfs")
                        .action(ArgAction::SetTrue)
                        .help("Put the overlay upperdir on a tmpfs"),
                )
                .arg(
                    Arg::new("memory")
                        .short('m')
                        .long("memory")
                        .help("Bounding size of the tmpfs"),
                )
                .arg(
                    Arg::new("transit_manifest")
                        .long("transit-manifest")
                        .help("Write a transit manifest for the named target"),
                ),
        )
        .subcommand(
            Command::new("chroot")
                .about("Interactively chroot into the package's build environment")
                .arg(Arg::new("recipe").help("Path to package.yml or pspec.xml")),
        )
        .subcommand(
            Command::new("update")
                .about("Update the base image of the given profile")
                .arg(Arg::new("profile_name").help("Profile whose image to update")),
        )
        .subcommand(
            Command::new("index")
                .about("Create a repo index in the given directory")
                .arg(Arg::new("dir").help("Directory to index")),
        )
        .subcommand(
            Command::new("delete-cache")
                .about("Delete assets stored on disk by solbuild")
                .arg(
                    Arg::new("all")
                        .short('a')
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Also delete ccache, packages and sources"),
                ),
        )
        .subcommand(Command::new("version").about("Print the version and exit"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("solbuild.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
