// src/users.rs

//! Passwd/group parsing and build-user provisioning
//!
//! ypkg builds run as an unprivileged `build` user inside the container.
//! Because the backing images ship without it, the session parses the
//! chroot's own /etc/passwd and /etc/group and provisions the account with
//! fixed uid/gid when missing.

use crate::chroot::ChrootExecutor;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// Login name of the in-container build user
pub const BUILD_USER: &str = "build";
/// Fixed uid of the build user
pub const BUILD_USER_ID: u32 = 1000;
/// Fixed gid of the build group
pub const BUILD_GROUP_ID: u32 = 1000;
/// Home directory of the build user, inside the container
pub const BUILD_USER_HOME: &str = "/home/build";
/// Gecos field for the build user
pub const BUILD_USER_GECOS: &str = "solbuild user";
/// Login shell for the build user
pub const BUILD_USER_SHELL: &str = "/bin/bash";

/// An /etc/passwd defined user
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
}

/// An /etc/group defined group
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Parsed view of a root's passwd and group databases
#[derive(Debug, Default)]
pub struct Passwd {
    pub users: HashMap<String, User>,
    pub groups: HashMap<String, Group>,
}

impl Passwd {
    /// Parse `<dir>/passwd` and `<dir>/group`, where `dir` is usually the
    /// `etc` directory of a chroot.
    pub fn parse(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            users: parse_users(&dir.join("passwd"))?,
            groups: parse_groups(&dir.join("group"))?,
        })
    }
}

fn malformed(path: &Path, line_no: usize, reason: &str) -> Error {
    Error::io(
        path,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("line {line_no}: {reason}"),
        ),
    )
}

/// Parse a *NIX style passwd file: exactly 7 colon-separated fields per line
pub fn parse_users(path: &Path) -> Result<HashMap<String, User>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut users = HashMap::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 7 {
            return Err(malformed(
                path,
                idx + 1,
                &format!("expected 7 fields in passwd entry, got {}", fields.len()),
            ));
        }
        let uid = fields[2]
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed(path, idx + 1, "invalid uid"))?;
        let gid = fields[3]
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed(path, idx + 1, "invalid gid"))?;
        let user = User {
            name: fields[0].trim().to_string(),
            uid,
            gid,
            gecos: fields[4].trim().to_string(),
            home: fields[5].trim().to_string(),
            shell: fields[6].trim().to_string(),
        };
        users.insert(user.name.clone(), user);
    }
    Ok(users)
}

/// Parse a *NIX style group file: exactly 4 colon-separated fields per line
pub fn parse_groups(path: &Path) -> Result<HashMap<String, Group>> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut groups = HashMap::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::io(path, e))?;
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() != 4 {
            return Err(malformed(
                path,
                idx + 1,
                &format!("expected 4 fields in group entry, got {}", fields.len()),
            ));
        }
        let gid = fields[2]
            .trim()
            .parse::<u32>()
            .map_err(|_| malformed(path, idx + 1, "invalid gid"))?;
        // An empty member field yields no members, not one empty member
        let members = fields[3].trim();
        let members: Vec<String> = if members.is_empty() {
            Vec::new()
        } else {
            members.split(',').map(|m| m.to_string()).collect()
        };
        let group = Group {
            name: fields[0].trim().to_string(),
            gid,
            members,
        };
        groups.insert(group.name.clone(), group);
    }
    Ok(groups)
}

/// Ensure the designated build user exists inside `root`, creating the
/// group and account with their fixed ids when missing. Idempotent.
pub fn ensure_build_user(executor: &ChrootExecutor, root: &Path) -> Result<()> {
    let passwd = Passwd::parse(root.join("etc"))?;
    if passwd.users.contains_key(BUILD_USER) {
        return Ok(());
    }

    info!(user = BUILD_USER, "adding build user to rootfs");
    executor.run(
        root,
        &format!("groupadd -g {BUILD_GROUP_ID} {BUILD_USER}"),
    )?;
    executor.run(
        root,
        &format!(
            "useradd -s {BUILD_USER_SHELL} -u {BUILD_USER_ID} -g {BUILD_USER} -d {BUILD_USER_HOME} -m {BUILD_USER} -c \"{BUILD_USER_GECOS}\""
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "passwd",
            "root:x:0:0:root:/root:/bin/bash\nbuild:x:1000:1000:solbuild user:/home/build:/bin/bash\n",
        );

        let users = parse_users(&path).unwrap();
        assert_eq!(users.len(), 2);

        let build = &users["build"];
        assert_eq!(build.uid, 1000);
        assert_eq!(build.gid, 1000);
        assert_eq!(build.home, "/home/build");
        assert_eq!(build.shell, "/bin/bash");
        assert_eq!(build.gecos, "solbuild user");
    }

    #[test]
    fn test_parse_users_wrong_field_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "passwd", "root:x:0:0:root:/root\n");
        assert!(parse_users(&path).is_err());
    }

    #[test]
    fn test_parse_users_bad_uid() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "passwd", "root:x:zero:0:root:/root:/bin/sh\n");
        assert!(parse_users(&path).is_err());
    }

    #[test]
    fn test_parse_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "group",
            "root:x:0:\naudio:x:63:alice,bob\n",
        );

        let groups = parse_groups(&path).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["audio"].gid, 63);
        assert_eq!(groups["audio"].members, vec!["alice", "bob"]);
    }

    #[test]
    fn test_parse_groups_empty_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "group", "wheel:x:10:\n");

        let groups = parse_groups(&path).unwrap();
        // No trailing "one empty member" artifact
        assert!(groups["wheel"].members.is_empty());
    }

    #[test]
    fn test_parse_groups_wrong_field_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "group", "wheel:x:10\n");
        assert!(parse_groups(&path).is_err());
    }

    #[test]
    fn test_passwd_parse_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "passwd", "root:x:0:0:root:/root:/bin/bash\n");
        write_file(dir.path(), "group", "root:x:0:\n");

        let passwd = Passwd::parse(dir.path()).unwrap();
        assert_eq!(passwd.users.len(), 1);
        assert_eq!(passwd.groups.len(), 1);
    }
}
