//! Host provisioning for the OpenQuake engine package.
//!
//! Run by the package manager's post-installation hook: checks the OS
//! release, bootstraps the RabbitMQ account, lays out directories and
//! config files, recreates the PostgreSQL database, maintains the
//! generated `pg_hba.conf` rules, restarts services and removes stale
//! bytecode. Every host tool sits behind a small trait so the flow in
//! [`orchestrator`] can run against fakes.

pub mod broker;
pub mod cleanup;
pub mod config;
pub mod database;
pub mod error;
mod exec;
mod file_ops;
pub mod group;
pub mod hba;
pub mod layout;
pub mod log_scan;
pub mod orchestrator;
pub mod outcome;
pub mod release;
pub mod service;
pub mod settings;

pub use config::ProvisionConfig;
pub use error::ProvisionError;
pub use exec::tool_present;
pub use orchestrator::{Provisioner, Toolbox};
pub use outcome::{ProvisionReport, Step, StepOutcome};
