use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Default location of the provisioner's own configuration.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/openquake/provision.toml";

/// Top‑level provisioner configuration (mirrors the packaged defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// OS codename → PostgreSQL major version.
    pub releases: BTreeMap<String, String>,
    pub broker: BrokerConfig,
    pub layout: LayoutConfig,
    pub database: DatabaseConfig,
    pub services: ServicesConfig,
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub ctl_path: PathBuf,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Runtime spool, world-writable with the sticky bit.
    pub spool_dir: PathBuf,
    pub spool_mode: u32,
    /// Installed package tree; source of the packaged defaults.
    pub install_dir: PathBuf,
    pub config_dir: PathBuf,
    pub config_dir_mode: u32,
    pub managed_files: Vec<String>,
    pub new_default_suffix: String,
    /// Settings file consumed by the workers, relative to `config_dir`.
    pub settings_file: String,
    pub group: String,
    pub group_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub psql_path: PathBuf,
    pub superuser: String,
    pub name: String,
    /// Database creation utility, relative to `layout.install_dir` unless absolute.
    pub create_script: PathBuf,
    pub schema_path: PathBuf,
    pub log_file: PathBuf,
    pub error_marker: String,
    /// Log lines containing any of these are not treated as errors.
    pub benign_patterns: Vec<String>,
    pub role_prefix: String,
    /// `{version}` is replaced with the PostgreSQL version.
    pub hba_path: String,
    pub bug_tracker: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceManagerKind {
    Auto,
    Sysv,
    Systemd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub manager: ServiceManagerKind,
    pub init_dir: PathBuf,
    pub broker_service: String,
    pub worker_service: String,
    pub database_service: String,
    /// Substring of a worker's command line.
    pub worker_pattern: String,
    pub grace_period_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Defaults to `layout.install_dir` when unset.
    pub root: Option<PathBuf>,
    pub extensions: Vec<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        let mut releases = BTreeMap::new();
        releases.insert("precise".into(), "9.1".into());
        releases.insert("trusty".into(), "9.3".into());

        Self {
            releases,
            broker: BrokerConfig::default(),
            layout: LayoutConfig::default(),
            database: DatabaseConfig::default(),
            services: ServicesConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ctl_path: "/usr/sbin/rabbitmqctl".into(),
            user: "openquake".into(),
            password: "openquake".into(),
            vhost: "openquake".into(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            spool_dir: "/var/lib/openquake".into(),
            spool_mode: 0o1777,
            install_dir: "/usr/openquake/engine".into(),
            config_dir: "/etc/openquake".into(),
            config_dir_mode: 0o755,
            managed_files: vec!["openquake.cfg".into()],
            new_default_suffix: ".new_in_this_release".into(),
            settings_file: "openquake.cfg".into(),
            group: "openquake".into(),
            group_file: "/etc/group".into(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            psql_path: "/usr/bin/psql".into(),
            superuser: "postgres".into(),
            name: "openquake2".into(),
            create_script: "bin/oq_create_db".into(),
            schema_path: "/usr/openquake/engine/openquake/engine/db/schema".into(),
            log_file: "/var/tmp/openquake-db-installation.log".into(),
            error_marker: "error".into(),
            benign_patterns: vec![
                "is not empty".into(),
                "error_msg_".into(),
                "already exists".into(),
                "SET client_min_messages TO ERROR".into(),
            ],
            role_prefix: "oq_".into(),
            hba_path: "/etc/postgresql/{version}/main/pg_hba.conf".into(),
            bug_tracker: "https://bugs.launchpad.net/oq-engine".into(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            manager: ServiceManagerKind::Auto,
            init_dir: "/etc/init.d".into(),
            broker_service: "rabbitmq-server".into(),
            worker_service: "celeryd".into(),
            database_service: "postgresql".into(),
            worker_pattern: "celeryd".into(),
            grace_period_secs: 5,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            root: None,
            extensions: vec!["pyc".into()],
        }
    }
}

impl ProvisionConfig {
    /// Load from `path`; a missing file means built-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "No provisioner config at {}, using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
        let cfg: ProvisionConfig = toml::from_str(&raw)
            .map_err(|e| ProvisionError::Config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;

        log::info!("Using provisioner config from {}", path.display());
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ProvisionError::Config(format!("failed to serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.releases.is_empty() {
            return Err(ProvisionError::Config(
                "at least one supported release is required".into(),
            ));
        }

        let required = [
            ("broker.user", &self.broker.user),
            ("broker.vhost", &self.broker.vhost),
            ("layout.group", &self.layout.group),
            ("layout.new_default_suffix", &self.layout.new_default_suffix),
            ("database.name", &self.database.name),
            ("database.superuser", &self.database.superuser),
            ("database.error_marker", &self.database.error_marker),
            ("services.worker_pattern", &self.services.worker_pattern),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ProvisionError::Config(format!("{key} must not be empty")));
            }
        }

        let prefix = &self.database.role_prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
            return Err(ProvisionError::Config(format!(
                "database.role_prefix must match [a-z_]+, got {prefix:?}"
            )));
        }

        if !self.database.hba_path.contains("{version}") {
            log::debug!("database.hba_path has no {{version}} placeholder");
        }

        Ok(())
    }

    /// The rules file for a given PostgreSQL version.
    pub fn hba_path(&self, pg_version: &str) -> PathBuf {
        PathBuf::from(self.database.hba_path.replace("{version}", pg_version))
    }

    pub fn create_script(&self) -> PathBuf {
        if self.database.create_script.is_absolute() {
            self.database.create_script.clone()
        } else {
            self.layout.install_dir.join(&self.database.create_script)
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.layout.config_dir.join(&self.layout.settings_file)
    }

    pub fn cleanup_root(&self) -> PathBuf {
        self.cleanup
            .root
            .clone()
            .unwrap_or_else(|| self.layout.install_dir.clone())
    }
}
