//! PostgreSQL host-based authentication rules (`pg_hba.conf`).
//!
//! The provisioner owns the `local <db> <prefix>* md5` rules it generates.
//! It regenerates them only when every rule mentioning a managed role looks
//! like one of its own; a single hand-written rule for a managed role leaves
//! the whole file alone.

use std::path::Path;

use regex::Regex;

use crate::error::{ProvisionError, Result};
use crate::file_ops::{mode_of, write_file_atomic};

/// What the managed rules look like.
#[derive(Debug, Clone)]
pub struct HbaPolicy {
    pub database: String,
    pub role_prefix: String,
    /// Roles that get a generated rule, in order.
    pub roles: Vec<String>,
}

/// Decision for one rules file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HbaPlan {
    /// The generated rules are already in place.
    Unchanged,
    /// Replace the file with this content.
    Rewrite(String),
    /// Hand-edited rules for managed roles exist; do not touch the file.
    Customized { managed: usize, generated: usize },
}

impl HbaPolicy {
    fn generated_pattern(&self) -> Result<Regex> {
        let pattern = format!(
            r"^local\s+{}\s+{}[a-z_]+\s+md5$",
            regex::escape(&self.database),
            regex::escape(&self.role_prefix)
        );
        Regex::new(&pattern)
            .map_err(|e| ProvisionError::Config(format!("bad rule pattern {pattern:?}: {e}")))
    }

    /// Keep only roles whose generated rule will be recognised as ours on the
    /// next run (`<prefix>[a-z_]+`); the rest are returned.
    pub fn retain_generatable_roles(&mut self) -> Result<Vec<String>> {
        let pattern = format!(r"^{}[a-z_]+$", regex::escape(&self.role_prefix));
        let role_re = Regex::new(&pattern)
            .map_err(|e| ProvisionError::Config(format!("bad role pattern {pattern:?}: {e}")))?;
        let (kept, rejected): (Vec<String>, Vec<String>) = std::mem::take(&mut self.roles)
            .into_iter()
            .partition(|role| role_re.is_match(role));
        self.roles = kept;
        Ok(rejected)
    }

    /// Non-comment rule whose user column names a managed role.
    fn is_managed(&self, line: &str) -> bool {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return false;
        }
        line.split_whitespace()
            .nth(2)
            .map(|users| {
                users
                    .split(',')
                    .any(|u| u.trim_matches('"').starts_with(&self.role_prefix))
            })
            .unwrap_or(false)
    }

    pub fn generated_rules(&self) -> Vec<String> {
        self.roles
            .iter()
            .map(|role| format!("local   {:<12} {:<22} md5", self.database, role))
            .collect()
    }

    pub fn plan(&self, content: &str) -> Result<HbaPlan> {
        let generated_re = self.generated_pattern()?;

        let managed = content.lines().filter(|l| self.is_managed(l)).count();
        let generated = content
            .lines()
            .filter(|l| self.is_managed(l) && generated_re.is_match(l.trim()))
            .count();

        if managed != generated {
            return Ok(HbaPlan::Customized { managed, generated });
        }

        let mut lines = self.generated_rules();
        lines.extend(
            content
                .lines()
                .filter(|l| !(self.is_managed(l) && generated_re.is_match(l.trim())))
                .map(str::to_string),
        );
        let mut rewritten = lines.join("\n");
        rewritten.push('\n');

        if rewritten == content {
            Ok(HbaPlan::Unchanged)
        } else {
            Ok(HbaPlan::Rewrite(rewritten))
        }
    }
}

/// Replace `path` with `content`, keeping the original permission bits.
pub fn write_rules(path: &Path, content: &str) -> Result<()> {
    let mode = mode_of(path)?;
    write_file_atomic(path, content.as_bytes(), mode)
}
