//! Worker settings file (`openquake.cfg`).
//!
//! The file is a flat ini-like document: `[section]` headers followed by
//! `key = value` lines. The provisioner only needs it to learn the database
//! role credentials and to warn about obviously broken values after a
//! migration; the workers are the real consumers.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ProvisionError, Result};

/// Default settings shipped with the package.
pub const PACKAGED_DEFAULT: &str = include_str!("../data/openquake.cfg");

const DEFAULT_ROLE_PASSWORD: &str = "openquake";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

/// A database role and the password the workers use for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCredential {
    pub role: String,
    pub password: String,
}

impl Settings {
    pub fn parse(text: &str) -> std::result::Result<Self, (usize, String)> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .ok_or_else(|| (lineno, format!("unterminated section header {line:?}")))?
                    .trim();
                if name.is_empty() {
                    return Err((lineno, "empty section name".into()));
                }
                sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| (lineno, format!("expected `key = value`, got {line:?}")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err((lineno, "empty key".into()));
            }

            let section = current
                .as_ref()
                .ok_or_else(|| (lineno, format!("key {key:?} outside of any section")))?;
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { sections })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
        Self::parse(&text).map_err(|(line, message)| ProvisionError::Settings {
            path: path.to_path_buf(),
            line,
            message,
        })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// The admin and job-init roles, falling back to the packaged names.
    pub fn database_roles(&self) -> Vec<RoleCredential> {
        [("admin", "oq_admin"), ("job_init", "oq_job_init")]
            .into_iter()
            .map(|(kind, default_role)| RoleCredential {
                role: self
                    .get("database", &format!("{kind}_user"))
                    .unwrap_or(default_role)
                    .to_string(),
                password: self
                    .get("database", &format!("{kind}_password"))
                    .unwrap_or(DEFAULT_ROLE_PASSWORD)
                    .to_string(),
            })
            .collect()
    }

    /// Sanity checks on values the workers rely on. Returns human-readable
    /// warnings; an empty vector means nothing looked wrong.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for section in ["celery", "memory", "amqp", "database"] {
            if !self.has_section(section) {
                warnings.push(format!("missing [{section}] section"));
            }
        }

        if let Some(raw) = self.get("celery", "concurrent_tasks") {
            match raw.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => warnings.push(format!(
                    "celery.concurrent_tasks must be a positive integer, got {raw:?}"
                )),
            }
        }

        let soft = self.percentage("memory", "soft_mem_limit", &mut warnings);
        let hard = self.percentage("memory", "hard_mem_limit", &mut warnings);
        if let (Some(soft), Some(hard)) = (soft, hard) {
            if soft > hard {
                warnings.push(format!(
                    "memory.soft_mem_limit ({soft}) is above memory.hard_mem_limit ({hard})"
                ));
            }
        }

        for section in ["amqp", "database"] {
            if let Some(raw) = self.get(section, "port") {
                match raw.parse::<u16>() {
                    Ok(p) if p > 0 => {}
                    _ => warnings.push(format!("{section}.port is not a valid port: {raw:?}")),
                }
            }
        }

        warnings
    }

    fn percentage(&self, section: &str, key: &str, warnings: &mut Vec<String>) -> Option<u32> {
        let raw = self.get(section, key)?;
        match raw.parse::<u32>() {
            Ok(v) if v <= 100 => Some(v),
            _ => {
                warnings.push(format!(
                    "{section}.{key} must be a percentage between 0 and 100, got {raw:?}"
                ));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packaged_default_is_clean() {
        let settings = Settings::parse(PACKAGED_DEFAULT).unwrap();
        assert!(settings.validate().is_empty(), "{:?}", settings.validate());
        let names: Vec<_> = settings.section_names().collect();
        assert_eq!(
            names,
            ["amqp", "celery", "database", "hazard", "memory", "risk"]
        );
        assert_eq!(settings.get("amqp", "vhost"), Some("openquake"));
        assert_eq!(settings.get("hazard", "point_source_weight"), Some("0.025"));
    }

    #[test]
    fn roles_come_from_database_section() {
        let settings = Settings::parse(
            "[database]\nadmin_user = oq_boss\nadmin_password = s3cret\n",
        )
        .unwrap();
        let roles = settings.database_roles();
        assert_eq!(
            roles,
            vec![
                RoleCredential {
                    role: "oq_boss".into(),
                    password: "s3cret".into()
                },
                RoleCredential {
                    role: "oq_job_init".into(),
                    password: "openquake".into()
                },
            ]
        );
    }

    #[test]
    fn key_outside_section_is_rejected() {
        let err = Settings::parse("# header\nfoo = bar\n").unwrap_err();
        assert_eq!(err.0, 2);
    }

    #[test]
    fn last_duplicate_wins() {
        let settings = Settings::parse("[celery]\nconcurrent_tasks = 4\nconcurrent_tasks = 8\n")
            .unwrap();
        assert_eq!(settings.get("celery", "concurrent_tasks"), Some("8"));
    }

    #[test]
    fn flags_inverted_memory_limits_and_bad_port() {
        let settings = Settings::parse(
            "[celery]\nconcurrent_tasks = 0\n[memory]\nsoft_mem_limit = 90\nhard_mem_limit = 70\n\
             [amqp]\nport = 99999\n[database]\nport = 5432\n",
        )
        .unwrap();
        let warnings = settings.validate();
        assert_eq!(warnings.len(), 3, "{warnings:?}");
        assert!(warnings.iter().any(|w| w.contains("concurrent_tasks")));
        assert!(warnings.iter().any(|w| w.contains("soft_mem_limit")));
        assert!(warnings.iter().any(|w| w.contains("amqp.port")));
    }
}
