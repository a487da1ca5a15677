use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use oq_provision::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(version, about = "OpenQuake engine host provisioner (package postinst hook)")]
pub struct Args {
    /// Action passed by the package manager
    #[arg(value_enum, default_value_t = Action::Configure)]
    pub action: Action,

    /// Most recently configured version, if any
    #[arg(id = "previous_version", value_name = "VERSION")]
    pub version: Option<String>,

    /// Path to the provisioner configuration
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Show what would be done without doing it
    #[arg(long)]
    pub dry_run: bool,

    /// Write the provisioning report as JSON to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Print the default configuration and exit
    #[arg(long)]
    pub print_default_config: bool,

    /// Log at debug level
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Post-installation actions defined by the Debian policy.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Configure,
    AbortUpgrade,
    AbortRemove,
    AbortDeconfigure,
    Triggered,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_configure() {
        let args = Args::parse_from(["oq-provision"]);
        assert_eq!(args.action, Action::Configure);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!args.dry_run);
    }

    #[test]
    fn accepts_postinst_arguments() {
        let args = Args::parse_from(["oq-provision", "configure", "1.0-1", "--dry-run"]);
        assert_eq!(args.action, Action::Configure);
        assert_eq!(args.version.as_deref(), Some("1.0-1"));
        assert!(args.dry_run);

        let args = Args::parse_from(["oq-provision", "abort-upgrade"]);
        assert_eq!(args.action, Action::AbortUpgrade);
    }
}
