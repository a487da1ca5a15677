//! OS release detection and PostgreSQL version gating.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{ProvisionError, Result};
use crate::exec;

/// Something that can tell us the distribution codename.
pub trait ReleaseProbe {
    fn codename(&self) -> Result<String>;
}

/// Asks `lsb_release`, falling back to `VERSION_CODENAME` in os-release.
#[derive(Debug, Clone)]
pub struct LsbRelease {
    pub os_release: PathBuf,
}

impl Default for LsbRelease {
    fn default() -> Self {
        Self {
            os_release: PathBuf::from("/etc/os-release"),
        }
    }
}

impl ReleaseProbe for LsbRelease {
    fn codename(&self) -> Result<String> {
        if which::which("lsb_release").is_ok() {
            let output = exec::run(Command::new("lsb_release").args(["--codename", "--short"]))?;
            let codename = exec::stdout_string(&output).trim().to_string();
            if !codename.is_empty() {
                return Ok(codename);
            }
        }

        let text = fs::read_to_string(&self.os_release)
            .map_err(|e| ProvisionError::io(&self.os_release, e))?;
        os_release_codename(&text).ok_or_else(|| {
            ProvisionError::System(format!(
                "No VERSION_CODENAME in {}",
                self.os_release.display()
            ))
        })
    }
}

fn os_release_codename(text: &str) -> Option<String> {
    text.lines()
        .filter_map(|l| l.trim().strip_prefix("VERSION_CODENAME="))
        .map(|v| v.trim_matches(|c| c == '"' || c == '\'').to_string())
        .find(|v| !v.is_empty())
}

/// Map a codename onto the PostgreSQL version shipped with it.
pub fn postgres_version_for(codename: &str, releases: &BTreeMap<String, String>) -> Result<String> {
    releases
        .get(codename)
        .cloned()
        .ok_or_else(|| ProvisionError::UnsupportedRelease(codename.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn releases() -> BTreeMap<String, String> {
        [("precise", "9.1"), ("trusty", "9.3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn known_codenames_map_to_versions() {
        assert_eq!(postgres_version_for("precise", &releases()).unwrap(), "9.1");
        assert_eq!(postgres_version_for("trusty", &releases()).unwrap(), "9.3");
    }

    #[test]
    fn unknown_codename_is_unsupported() {
        let err = postgres_version_for("xenial", &releases()).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedRelease(ref c) if c == "xenial"));
    }

    #[test]
    fn reads_codename_from_os_release() {
        let text = "NAME=\"Ubuntu\"\nVERSION_ID=\"14.04\"\nVERSION_CODENAME=\"trusty\"\n";
        assert_eq!(os_release_codename(text).as_deref(), Some("trusty"));
        assert_eq!(os_release_codename("NAME=Ubuntu\n"), None);
    }
}
