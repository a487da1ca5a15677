//! Message-broker account bootstrap (RabbitMQ).

use std::path::PathBuf;
use std::process::Command;

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::exec;
use crate::outcome::{ProvisionReport, Step, StepOutcome};

/// The handful of broker admin operations provisioning needs.
pub trait BrokerAdmin {
    fn list_users(&self) -> Result<Vec<String>>;
    fn list_vhosts(&self) -> Result<Vec<String>>;
    fn add_user(&self, user: &str, password: &str) -> Result<()>;
    fn add_vhost(&self, vhost: &str) -> Result<()>;
    /// Grant configure/write/read on everything in `vhost`.
    fn grant_all(&self, vhost: &str, user: &str) -> Result<()>;
}

/// `rabbitmqctl` backed implementation.
#[derive(Debug, Clone)]
pub struct RabbitmqCtl {
    pub ctl_path: PathBuf,
}

impl RabbitmqCtl {
    pub fn new(ctl_path: impl Into<PathBuf>) -> Self {
        Self {
            ctl_path: ctl_path.into(),
        }
    }

    fn ctl(&self) -> Command {
        let mut cmd = Command::new(&self.ctl_path);
        cmd.arg("-q");
        cmd
    }
}

impl BrokerAdmin for RabbitmqCtl {
    fn list_users(&self) -> Result<Vec<String>> {
        let output = exec::run(self.ctl().arg("list_users"))?;
        Ok(parse_listing(&exec::stdout_string(&output)))
    }

    fn list_vhosts(&self) -> Result<Vec<String>> {
        let output = exec::run(self.ctl().arg("list_vhosts"))?;
        Ok(parse_listing(&exec::stdout_string(&output)))
    }

    fn add_user(&self, user: &str, password: &str) -> Result<()> {
        exec::run(self.ctl().args(["add_user", user, password]))?;
        Ok(())
    }

    fn add_vhost(&self, vhost: &str) -> Result<()> {
        exec::run(self.ctl().args(["add_vhost", vhost]))?;
        Ok(())
    }

    fn grant_all(&self, vhost: &str, user: &str) -> Result<()> {
        exec::run(
            self.ctl()
                .args(["set_permissions", "-p", vhost, user, ".*", ".*", ".*"]),
        )?;
        Ok(())
    }
}

/// First column of every data line of a `rabbitmqctl list_*` output.
///
/// Older releases print `Listing users ...` / `...done.` around the data
/// even with `-q`; newer ones may print a column header.
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("Listing ") && !l.starts_with("...done"))
        .filter_map(|l| l.split_whitespace().next())
        .filter(|name| *name != "user" && *name != "name")
        .map(str::to_string)
        .collect()
}

/// Create the broker user and vhost if they are missing.
pub fn ensure_account(
    admin: &dyn BrokerAdmin,
    cfg: &BrokerConfig,
    dry_run: bool,
    report: &mut ProvisionReport,
) -> Result<()> {
    let user_target = format!("broker user {}", cfg.user);
    let users = admin.list_users()?;
    if users.iter().any(|u| u == &cfg.user) {
        report.record(Step::Broker, user_target, StepOutcome::Unchanged);
    } else {
        if !dry_run {
            admin.add_user(&cfg.user, &cfg.password)?;
        }
        report.record(Step::Broker, user_target, StepOutcome::Created);
    }

    let vhost_target = format!("broker vhost {}", cfg.vhost);
    let vhosts = admin.list_vhosts()?;
    if vhosts.iter().any(|v| v == &cfg.vhost) {
        report.record(Step::Broker, vhost_target, StepOutcome::Unchanged);
    } else {
        if !dry_run {
            admin.add_vhost(&cfg.vhost)?;
            admin.grant_all(&cfg.vhost, &cfg.user)?;
        }
        report.record(Step::Broker, vhost_target, StepOutcome::Created);
    }

    Ok(())
}
