//! PostgreSQL flatten-and-recreate.

use std::fs::{self, File};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::unistd::User;

use crate::error::{ProvisionError, Result};
use crate::exec;
use crate::service::ServiceControl;

pub trait DatabaseAdmin {
    /// Restart the engine so no orphaned session survives.
    fn restart(&self, version: &str) -> Result<()>;
    /// Re-read the authentication rules.
    fn reload(&self, version: &str) -> Result<()>;
    /// Drop and recreate the database, sending all tool output to `log`.
    fn recreate(&self, log: &Path) -> Result<()>;
    fn set_role_password(&self, role: &str, password: &str) -> Result<()>;
}

/// Drives `psql` and the engine's creation script as the database superuser.
pub struct Postgres<'a> {
    pub superuser: String,
    pub database: String,
    pub psql: PathBuf,
    pub create_script: PathBuf,
    pub schema_path: PathBuf,
    pub service_name: String,
    pub services: &'a dyn ServiceControl,
}

impl Postgres<'_> {
    fn as_superuser(&self, program: &Path) -> Result<Command> {
        let user = User::from_name(&self.superuser)
            .map_err(|e| {
                ProvisionError::System(format!("user lookup for {} failed: {e}", self.superuser))
            })?
            .ok_or_else(|| {
                ProvisionError::System(format!("database superuser {} does not exist", self.superuser))
            })?;

        let mut cmd = Command::new(program);
        cmd.uid(user.uid.as_raw())
            .gid(user.gid.as_raw())
            .env("HOME", &user.dir)
            .env("USER", &self.superuser)
            .current_dir("/");
        Ok(cmd)
    }
}

/// SQL string literal with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// SQL identifier with embedded double quotes doubled.
pub fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

impl DatabaseAdmin for Postgres<'_> {
    fn restart(&self, version: &str) -> Result<()> {
        self.services.restart(&self.service_name, Some(version))
    }

    fn reload(&self, version: &str) -> Result<()> {
        self.services.reload(&self.service_name, Some(version))
    }

    fn recreate(&self, log: &Path) -> Result<()> {
        if let Some(parent) = log.parent() {
            fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
        }
        let out = File::create(log).map_err(|e| ProvisionError::io(log, e))?;
        let err = out.try_clone().map_err(|e| ProvisionError::io(log, e))?;

        let mut cmd = self.as_superuser(&self.create_script)?;
        cmd.arg("--yes")
            .arg(format!("--db-name={}", self.database))
            .arg(format!("--db-user={}", self.superuser))
            .arg("--no-tab-spaces")
            .arg(format!("--schema-path={}", self.schema_path.display()))
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err);

        log::info!("Recreating database {} (log: {})", self.database, log.display());
        let status = cmd.status().map_err(|e| ProvisionError::Command {
            command: exec::describe(&cmd),
            detail: e.to_string(),
        })?;
        // The log scan decides; a non-zero exit alone is only worth a warning.
        if !status.success() {
            log::warn!("{} exited with {status}", self.create_script.display());
        }
        Ok(())
    }

    fn set_role_password(&self, role: &str, password: &str) -> Result<()> {
        let sql = format!(
            "ALTER ROLE {} WITH PASSWORD {}",
            quote_ident(role),
            quote_literal(password)
        );
        let mut cmd = self.as_superuser(&self.psql)?;
        cmd.args(["-X", "-q", "-v", "ON_ERROR_STOP=1"]);
        exec::run_with_input(&mut cmd, format!("{sql};\n").as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_escaped() {
        assert_eq!(quote_literal("openquake"), "'openquake'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_ident("oq_admin"), "\"oq_admin\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
