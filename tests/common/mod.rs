//! In-memory stand-ins for the host collaborators plus a temp-dir host layout.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;
use tempfile::TempDir;

use oq_provision::broker::BrokerAdmin;
use oq_provision::database::DatabaseAdmin;
use oq_provision::error::Result;
use oq_provision::group::GroupAdmin;
use oq_provision::release::ReleaseProbe;
use oq_provision::service::{ProcessTable, ServiceControl};
use oq_provision::settings::PACKAGED_DEFAULT;
use oq_provision::{ProvisionConfig, ProvisionError, ProvisionReport, Provisioner, Toolbox};

pub const STOCK_HBA: &str = "\
# TYPE  DATABASE        USER            ADDRESS                 METHOD
local   all             postgres                                peer
local   all             all                                     peer
host    all             all             127.0.0.1/32            md5
";

pub struct FakeRelease(pub &'static str);

impl ReleaseProbe for FakeRelease {
    fn codename(&self) -> Result<String> {
        Ok(self.0.to_string())
    }
}

/// With `node_down` every query fails the way `rabbitmqctl` does when the node is stopped.
#[derive(Default)]
pub struct FakeBroker {
    pub node_down: bool,
    pub users: RefCell<Vec<String>>,
    pub vhosts: RefCell<Vec<String>>,
    pub calls: RefCell<Vec<String>>,
}

impl BrokerAdmin for FakeBroker {
    fn list_users(&self) -> Result<Vec<String>> {
        if self.node_down {
            return Err(ProvisionError::Command {
                command: "rabbitmqctl -q list_users".into(),
                detail: "unable to connect to node rabbit@localhost: nodedown".into(),
            });
        }
        Ok(self.users.borrow().clone())
    }

    fn list_vhosts(&self) -> Result<Vec<String>> {
        Ok(self.vhosts.borrow().clone())
    }

    fn add_user(&self, user: &str, _password: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("add_user {user}"));
        self.users.borrow_mut().push(user.to_string());
        Ok(())
    }

    fn add_vhost(&self, vhost: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("add_vhost {vhost}"));
        self.vhosts.borrow_mut().push(vhost.to_string());
        Ok(())
    }

    fn grant_all(&self, vhost: &str, user: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("set_permissions {vhost} {user}"));
        Ok(())
    }
}

/// Writes a canned creation log and remembers what it was asked to do.
pub struct FakeDatabase {
    pub creation_log: String,
    pub calls: RefCell<Vec<String>>,
}

impl FakeDatabase {
    pub fn with_log(creation_log: &str) -> Self {
        Self {
            creation_log: creation_log.to_string(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl DatabaseAdmin for FakeDatabase {
    fn restart(&self, version: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("restart {version}"));
        Ok(())
    }

    fn reload(&self, version: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("reload {version}"));
        Ok(())
    }

    fn recreate(&self, log: &Path) -> Result<()> {
        self.calls.borrow_mut().push("recreate".to_string());
        fs::write(log, &self.creation_log).map_err(|e| ProvisionError::Io {
            path: log.to_path_buf(),
            source: e,
        })
    }

    fn set_role_password(&self, role: &str, password: &str) -> Result<()> {
        self.calls
            .borrow_mut()
            .push(format!("password {role}={password}"));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeServices {
    pub installed: Vec<String>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeServices {
    pub fn with(installed: &[&str]) -> Self {
        Self {
            installed: installed.iter().map(|s| s.to_string()).collect(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ServiceControl for FakeServices {
    fn has_service(&self, name: &str) -> bool {
        self.installed.iter().any(|s| s == name)
    }

    fn start(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("start {name}"));
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("stop {name}"));
        Ok(())
    }

    fn restart(&self, name: &str, _instance: Option<&str>) -> Result<()> {
        self.calls.borrow_mut().push(format!("restart {name}"));
        Ok(())
    }

    fn reload(&self, name: &str, _instance: Option<&str>) -> Result<()> {
        self.calls.borrow_mut().push(format!("reload {name}"));
        Ok(())
    }
}

/// `running` workers that only exit on SIGKILL, or on SIGTERM when `obedient`.
pub struct FakeProcesses {
    pub running: RefCell<usize>,
    pub obedient: bool,
    pub signals: RefCell<Vec<Signal>>,
}

impl FakeProcesses {
    pub fn none() -> Self {
        Self::stubborn(0)
    }

    pub fn stubborn(running: usize) -> Self {
        Self {
            running: RefCell::new(running),
            obedient: false,
            signals: RefCell::new(Vec::new()),
        }
    }
}

impl ProcessTable for FakeProcesses {
    fn signal_matching(&self, _pattern: &str, signal: Signal) -> Result<usize> {
        let hit = *self.running.borrow();
        if hit > 0 {
            self.signals.borrow_mut().push(signal);
        }
        if signal == Signal::SIGKILL || self.obedient {
            *self.running.borrow_mut() = 0;
        }
        Ok(hit)
    }
}

#[derive(Default)]
pub struct FakeGroups {
    pub read_only: bool,
    pub groups: RefCell<Vec<String>>,
    pub created: RefCell<Vec<String>>,
    pub assigned: RefCell<Vec<PathBuf>>,
}

impl GroupAdmin for FakeGroups {
    fn exists(&self, group: &str) -> Result<bool> {
        Ok(self.groups.borrow().iter().any(|g| g == group))
    }

    fn create_system_group(&self, group: &str) -> Result<()> {
        if self.read_only {
            return Err(ProvisionError::Command {
                command: format!("addgroup --system {group}"),
                detail: "cannot lock /etc/group".into(),
            });
        }
        self.created.borrow_mut().push(group.to_string());
        self.groups.borrow_mut().push(group.to_string());
        Ok(())
    }

    fn assign_tree(&self, root: &Path, group: &str) -> Result<usize> {
        if self.read_only {
            return Err(ProvisionError::System(format!(
                "chown {} to {group}: EPERM",
                root.display()
            )));
        }
        self.assigned.borrow_mut().push(root.to_path_buf());
        Ok(1)
    }
}

/// A throwaway host filesystem rooted in a temp dir.
pub struct Host {
    pub root: TempDir,
    pub cfg: ProvisionConfig,
}

impl Host {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();

        let install_dir = base.join("usr/openquake/engine");
        fs::create_dir_all(install_dir.join("bin")).unwrap();
        fs::write(install_dir.join("openquake.cfg"), PACKAGED_DEFAULT).unwrap();

        let hba_dir = base.join("etc/postgresql/9.3/main");
        fs::create_dir_all(&hba_dir).unwrap();
        fs::write(hba_dir.join("pg_hba.conf"), STOCK_HBA).unwrap();

        let mut cfg = ProvisionConfig::default();
        cfg.layout.install_dir = install_dir;
        cfg.layout.spool_dir = base.join("var/lib/openquake");
        cfg.layout.config_dir = base.join("etc/openquake");
        cfg.layout.group_file = base.join("etc/group");
        cfg.database.log_file = base.join("var/tmp/openquake-db-installation.log");
        cfg.database.hba_path = format!("{}/etc/postgresql/{{version}}/main/pg_hba.conf", base.display());
        cfg.services.grace_period_secs = 0;
        fs::create_dir_all(base.join("var/tmp")).unwrap();

        Self { root, cfg }
    }

    pub fn hba_path(&self) -> PathBuf {
        self.cfg.hba_path("9.3")
    }

    pub fn installed_settings(&self) -> PathBuf {
        self.cfg.layout.config_dir.join("openquake.cfg")
    }

    pub fn sidecar(&self) -> PathBuf {
        self.cfg
            .layout
            .config_dir
            .join("openquake.cfg.new_in_this_release")
    }
}

/// All fakes for one scenario.
pub struct Fakes {
    pub release: FakeRelease,
    pub broker: FakeBroker,
    pub database: FakeDatabase,
    pub services: FakeServices,
    pub processes: FakeProcesses,
    pub groups: FakeGroups,
    pub with_broker: bool,
    pub with_database: bool,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            release: FakeRelease("trusty"),
            broker: FakeBroker::default(),
            database: FakeDatabase::with_log("CREATE TABLE\nALTER TABLE\n"),
            services: FakeServices::with(&["rabbitmq-server", "postgresql", "celeryd"]),
            processes: FakeProcesses::none(),
            groups: FakeGroups::default(),
            with_broker: true,
            with_database: true,
        }
    }

    pub fn toolbox(&self) -> Toolbox<'_> {
        let broker: Option<&dyn BrokerAdmin> = if self.with_broker {
            Some(&self.broker)
        } else {
            None
        };
        let database: Option<&dyn DatabaseAdmin> = if self.with_database {
            Some(&self.database)
        } else {
            None
        };
        Toolbox {
            release: &self.release,
            broker,
            database,
            services: &self.services,
            processes: &self.processes,
            groups: &self.groups,
        }
    }

    pub fn run(&self, cfg: &ProvisionConfig, dry_run: bool) -> (ProvisionReport, Result<()>) {
        let mut report = ProvisionReport::new(dry_run);
        let result = Provisioner::new(cfg, self.toolbox())
            .dry_run(dry_run)
            .run(&mut report);
        (report, result)
    }
}
