//! System group provisioning.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::unistd::{Group, chown};
use walkdir::WalkDir;

use crate::error::{ProvisionError, Result};
use crate::exec;

pub trait GroupAdmin {
    /// Exact-name lookup in the group database.
    fn exists(&self, group: &str) -> Result<bool>;
    fn create_system_group(&self, group: &str) -> Result<()>;
    /// Give every entry under `root` to `group`; returns how many entries changed hands.
    fn assign_tree(&self, root: &Path, group: &str) -> Result<usize>;
}

/// `/etc/group` + `addgroup`/`groupadd` + `chown(2)`.
#[derive(Debug, Clone)]
pub struct SystemGroups {
    pub group_file: PathBuf,
}

impl SystemGroups {
    pub fn new(group_file: impl Into<PathBuf>) -> Self {
        Self {
            group_file: group_file.into(),
        }
    }
}

/// True if a line of `content` starts with exactly `group:`.
pub fn group_listed(content: &str, group: &str) -> bool {
    content
        .lines()
        .any(|l| l.split(':').next() == Some(group) && l.contains(':'))
}

impl GroupAdmin for SystemGroups {
    fn exists(&self, group: &str) -> Result<bool> {
        let content = fs::read_to_string(&self.group_file)
            .map_err(|e| ProvisionError::io(&self.group_file, e))?;
        Ok(group_listed(&content, group))
    }

    fn create_system_group(&self, group: &str) -> Result<()> {
        // Debian ships addgroup; plain shadow-utils only has groupadd.
        let mut cmd = if which::which("addgroup").is_ok() {
            Command::new("addgroup")
        } else {
            Command::new("groupadd")
        };
        exec::run(cmd.args(["--system", group]))?;
        Ok(())
    }

    fn assign_tree(&self, root: &Path, group: &str) -> Result<usize> {
        let gid = Group::from_name(group)
            .map_err(|e| ProvisionError::System(format!("group lookup for {group} failed: {e}")))?
            .ok_or_else(|| ProvisionError::System(format!("group {group} does not exist")))?
            .gid;

        let mut changed = 0;
        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|e| {
                ProvisionError::System(format!("walking {}: {e}", root.display()))
            })?;
            let meta = entry
                .metadata()
                .map_err(|e| ProvisionError::System(format!("{}: {e}", entry.path().display())))?;
            if std::os::unix::fs::MetadataExt::gid(&meta) == gid.as_raw() {
                continue;
            }
            chown(entry.path(), None, Some(gid)).map_err(|e| {
                ProvisionError::System(format!("chgrp {} {}: {e}", group, entry.path().display()))
            })?;
            changed += 1;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str = "root:x:0:\nopenquake-users:x:1001:\nadm:x:4:syslog\n";

    #[test]
    fn exact_leading_match_only() {
        assert!(group_listed(GROUPS, "adm"));
        assert!(!group_listed(GROUPS, "openquake"));
        assert!(!group_listed(GROUPS, "syslog"));
    }

    #[test]
    fn reads_group_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group");
        fs::write(&path, GROUPS).unwrap();

        let groups = SystemGroups::new(&path);
        assert!(groups.exists("root").unwrap());
        assert!(!groups.exists("openquake").unwrap());
    }
}
