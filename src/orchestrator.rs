//! Provisioning flow.
//!
//! Steps run strictly in order and each one records what it did. The only
//! fatal conditions are an unsupported release (checked before anything is
//! touched), errors in the database creation log, and I/O failures on the
//! managed paths. Broker, group and service failures are logged and recorded
//! as skipped.

use std::fs;

use crate::broker::{self, BrokerAdmin};
use crate::cleanup;
use crate::config::ProvisionConfig;
use crate::database::DatabaseAdmin;
use crate::error::{ProvisionError, Result};
use crate::group::GroupAdmin;
use crate::hba::{self, HbaPlan, HbaPolicy};
use crate::layout;
use crate::log_scan::LogScanner;
use crate::outcome::{ProvisionReport, Step, StepOutcome};
use crate::release::{self, ReleaseProbe};
use crate::service::{self, ProcessTable, ServiceControl};
use crate::settings::{RoleCredential, Settings};

/// The host collaborators a run talks to. `None` means the tool is not installed.
pub struct Toolbox<'a> {
    pub release: &'a dyn ReleaseProbe,
    pub broker: Option<&'a dyn BrokerAdmin>,
    pub database: Option<&'a dyn DatabaseAdmin>,
    pub services: &'a dyn ServiceControl,
    pub processes: &'a dyn ProcessTable,
    pub groups: &'a dyn GroupAdmin,
}

pub struct Provisioner<'a> {
    cfg: &'a ProvisionConfig,
    tools: Toolbox<'a>,
    dry_run: bool,
}

impl<'a> Provisioner<'a> {
    pub fn new(cfg: &'a ProvisionConfig, tools: Toolbox<'a>) -> Self {
        Self {
            cfg,
            tools,
            dry_run: false,
        }
    }

    /// Report what would change without changing anything.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run every step. `report` keeps whatever was done even when a later step fails.
    pub fn run(&self, report: &mut ProvisionReport) -> Result<()> {
        let pg_version = self.check_release(report)?;
        self.bootstrap_broker(report);
        self.prepare_layout(report)?;
        self.provision_group(report);
        if let Some(db) = self.tools.database {
            self.recreate_database(db, &pg_version, report)?;
            self.rewrite_auth_rules(db, &pg_version, report)?;
        } else {
            let reason = format!("{} not found", self.cfg.database.psql_path.display());
            report.record(Step::Database, "database", StepOutcome::skipped(&reason));
            report.record(Step::AuthRules, "pg_hba.conf", StepOutcome::skipped(reason));
        }
        self.restart_services(report);
        self.clean_bytecode(report)?;
        Ok(())
    }

    fn check_release(&self, report: &mut ProvisionReport) -> Result<String> {
        let codename = self.tools.release.codename()?;
        let version = release::postgres_version_for(&codename, &self.cfg.releases)?;
        report.record(
            Step::Release,
            format!("{codename} (PostgreSQL {version})"),
            StepOutcome::Unchanged,
        );
        Ok(version)
    }

    fn bootstrap_broker(&self, report: &mut ProvisionReport) {
        let Some(admin) = self.tools.broker else {
            report.record(
                Step::Broker,
                "broker account",
                StepOutcome::skipped(format!("{} not found", self.cfg.broker.ctl_path.display())),
            );
            return;
        };
        if let Err(e) = broker::ensure_account(admin, &self.cfg.broker, self.dry_run, report) {
            log::warn!("Setting up the broker account failed: {e}");
            report.record(Step::Broker, "broker account", StepOutcome::skipped(e.to_string()));
        }
    }

    fn prepare_layout(&self, report: &mut ProvisionReport) -> Result<()> {
        let layout_cfg = &self.cfg.layout;

        for (dir, mode) in [
            (&layout_cfg.spool_dir, layout_cfg.spool_mode),
            (&layout_cfg.config_dir, layout_cfg.config_dir_mode),
        ] {
            let outcome = layout::ensure_dir(dir, mode, self.dry_run)?;
            report.record(Step::Layout, dir.display().to_string(), outcome);
        }

        for name in &layout_cfg.managed_files {
            let packaged = layout_cfg.install_dir.join(name);
            let installed = layout_cfg.config_dir.join(name);
            if !packaged.is_file() {
                report.record(
                    Step::ConfigMigration,
                    installed.display().to_string(),
                    StepOutcome::skipped(format!("no packaged default at {}", packaged.display())),
                );
                continue;
            }

            let outcome = layout::migrate_config(
                &packaged,
                &installed,
                &layout_cfg.new_default_suffix,
                self.dry_run,
            )?;
            if let StepOutcome::Migrated { sidecar } = &outcome {
                report.notice(format!(
                    "{} has local changes and was kept; the new default is in {}",
                    installed.display(),
                    sidecar.display()
                ));
            }
            report.record(Step::ConfigMigration, installed.display().to_string(), outcome);
        }

        let settings_path = self.cfg.settings_path();
        if settings_path.is_file() {
            match Settings::load(&settings_path) {
                Ok(settings) => {
                    for warning in settings.validate() {
                        report.notice(format!("{}: {warning}", settings_path.display()));
                    }
                }
                Err(e) => report.notice(e.to_string()),
            }
        }

        Ok(())
    }

    fn provision_group(&self, report: &mut ProvisionReport) {
        let group = &self.cfg.layout.group;
        let groups = self.tools.groups;
        let group_target = format!("group {group}");

        let created = match groups.exists(group) {
            Ok(true) => Ok(StepOutcome::Unchanged),
            Ok(false) if self.dry_run => Ok(StepOutcome::Created),
            Ok(false) => groups.create_system_group(group).map(|()| StepOutcome::Created),
            Err(e) => Err(e),
        };
        match created {
            Ok(outcome) => report.record(Step::Group, group_target, outcome),
            Err(e) => {
                log::warn!("Creating group {group} failed: {e}");
                report.record(Step::Group, group_target, StepOutcome::skipped(e.to_string()));
                return;
            }
        }

        let config_dir = &self.cfg.layout.config_dir;
        let target = format!("{} owned by group {group}", config_dir.display());
        if self.dry_run {
            report.record(Step::Group, target, StepOutcome::skipped("dry run"));
            return;
        }
        let outcome = match groups.assign_tree(config_dir, group) {
            Ok(0) => StepOutcome::Unchanged,
            Ok(_) => StepOutcome::Updated,
            Err(e) => {
                log::warn!("Handing {} to group {group} failed: {e}", config_dir.display());
                StepOutcome::skipped(e.to_string())
            }
        };
        report.record(Step::Group, target, outcome);
    }

    /// Credentials the workers connect with: the live settings file, then
    /// the packaged one, then the built-in role names.
    fn database_roles(&self) -> Vec<RoleCredential> {
        let packaged = self
            .cfg
            .layout
            .install_dir
            .join(&self.cfg.layout.settings_file);
        for path in [self.cfg.settings_path(), packaged] {
            if !path.is_file() {
                continue;
            }
            match Settings::load(&path) {
                Ok(settings) => return settings.database_roles(),
                Err(e) => log::warn!("Ignoring unreadable settings: {e}"),
            }
        }
        Settings::default().database_roles()
    }

    fn recreate_database(
        &self,
        db: &dyn DatabaseAdmin,
        pg_version: &str,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        let db_cfg = &self.cfg.database;
        let roles = self.database_roles();

        if self.dry_run {
            report.record(
                Step::Database,
                format!("{} worker processes", self.cfg.services.worker_pattern),
                StepOutcome::skipped("dry run"),
            );
            report.record(Step::Database, format!("database {}", db_cfg.name), StepOutcome::Created);
            for role in &roles {
                report.record(Step::Database, format!("role {}", role.role), StepOutcome::Updated);
            }
            return Ok(());
        }

        let shutdown =
            service::shutdown_workers(self.tools.services, self.tools.processes, &self.cfg.services)?;
        report.record(
            Step::Database,
            format!("{} worker processes", self.cfg.services.worker_pattern),
            if shutdown.did_anything() {
                StepOutcome::Updated
            } else {
                StepOutcome::Unchanged
            },
        );

        if let Err(e) = db.restart(pg_version) {
            log::warn!("PostgreSQL {pg_version} restart failed: {e}");
        }

        db.recreate(&db_cfg.log_file)?;
        report.record(Step::Database, format!("database {}", db_cfg.name), StepOutcome::Created);

        for role in &roles {
            match db.set_role_password(&role.role, &role.password) {
                Ok(()) => {
                    report.record(Step::Database, format!("role {}", role.role), StepOutcome::Updated)
                }
                Err(e) => {
                    log::warn!("Resetting the password of {} failed: {e}", role.role);
                    report.record(
                        Step::Database,
                        format!("role {}", role.role),
                        StepOutcome::skipped(e.to_string()),
                    );
                }
            }
        }

        LogScanner::new(&db_cfg.error_marker, &db_cfg.benign_patterns).check_file(&db_cfg.log_file)
    }

    fn rewrite_auth_rules(
        &self,
        db: &dyn DatabaseAdmin,
        pg_version: &str,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        let path = self.cfg.hba_path(pg_version);
        let target = path.display().to_string();
        if !path.is_file() {
            report.record(Step::AuthRules, target, StepOutcome::skipped("rules file not found"));
            return Ok(());
        }

        let mut policy = HbaPolicy {
            database: self.cfg.database.name.clone(),
            role_prefix: self.cfg.database.role_prefix.clone(),
            roles: self.database_roles().into_iter().map(|r| r.role).collect(),
        };
        for role in policy.retain_generatable_roles()? {
            report.notice(format!(
                "role {role} does not match {}[a-z_]+ so no rule is generated for it; \
                 add its entry to {} by hand",
                policy.role_prefix,
                path.display()
            ));
        }
        let content = fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;

        match policy.plan(&content)? {
            HbaPlan::Unchanged => report.record(Step::AuthRules, target, StepOutcome::Unchanged),
            HbaPlan::Rewrite(new_content) => {
                if !self.dry_run {
                    hba::write_rules(&path, &new_content)?;
                    if let Err(e) = db.reload(pg_version) {
                        log::warn!("PostgreSQL {pg_version} reload failed: {e}");
                    }
                }
                report.record(Step::AuthRules, target, StepOutcome::Updated);
            }
            HbaPlan::Customized { managed, generated } => {
                report.notice(format!(
                    "{} has custom rules for {}* roles ({managed} rule(s), {generated} generated) \
                     and was left untouched; make sure it contains:\n{}",
                    path.display(),
                    policy.role_prefix,
                    policy.generated_rules().join("\n")
                ));
                report.record(
                    Step::AuthRules,
                    target,
                    StepOutcome::skipped("custom rules present"),
                );
            }
        }
        Ok(())
    }

    fn restart_services(&self, report: &mut ProvisionReport) {
        let services = self.tools.services;
        let svc_cfg = &self.cfg.services;

        let broker_target = format!("service {}", svc_cfg.broker_service);
        if self.dry_run {
            report.record(Step::Services, broker_target, StepOutcome::Updated);
        } else {
            match services.restart(&svc_cfg.broker_service, None) {
                Ok(()) => report.record(Step::Services, broker_target, StepOutcome::Updated),
                Err(e) => {
                    log::warn!("Restarting {} failed: {e}", svc_cfg.broker_service);
                    report.record(Step::Services, broker_target, StepOutcome::skipped(e.to_string()));
                }
            }
        }

        let worker_target = format!("service {}", svc_cfg.worker_service);
        if !services.has_service(&svc_cfg.worker_service) {
            report.notice(format!(
                "{} is not managed by the init system; start it manually as a non-root user",
                svc_cfg.worker_service
            ));
            report.record(
                Step::Services,
                worker_target,
                StepOutcome::skipped("no init entry"),
            );
            return;
        }
        if self.dry_run {
            report.record(Step::Services, worker_target, StepOutcome::Updated);
            return;
        }
        match services.restart(&svc_cfg.worker_service, None) {
            Ok(()) => report.record(Step::Services, worker_target, StepOutcome::Updated),
            Err(e) => {
                log::warn!("Restarting {} failed: {e}", svc_cfg.worker_service);
                report.record(Step::Services, worker_target, StepOutcome::skipped(e.to_string()));
            }
        }
    }

    fn clean_bytecode(&self, report: &mut ProvisionReport) -> Result<()> {
        let root = self.cfg.cleanup_root();
        let removed = cleanup::remove_stale(&root, &self.cfg.cleanup.extensions, self.dry_run)?;
        report.record(
            Step::Cleanup,
            format!("{} ({removed} stale file(s))", root.display()),
            if removed > 0 {
                StepOutcome::Updated
            } else {
                StepOutcome::Unchanged
            },
        );
        Ok(())
    }
}
