//! Typed step outcomes and the provisioning report.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Phase of the provisioning run a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Release,
    Broker,
    Layout,
    ConfigMigration,
    Group,
    Database,
    AuthRules,
    Services,
    Cleanup,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Release => "release",
            Step::Broker => "broker",
            Step::Layout => "layout",
            Step::ConfigMigration => "config-migration",
            Step::Group => "group",
            Step::Database => "database",
            Step::AuthRules => "auth-rules",
            Step::Services => "services",
            Step::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// What a single idempotent operation did (or would do, in dry-run mode).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepOutcome {
    Unchanged,
    Created,
    Updated,
    /// Local file kept; the new packaged default was written beside it.
    Migrated { sidecar: PathBuf },
    Skipped { reason: String },
}

impl StepOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StepOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(
            self,
            StepOutcome::Created | StepOutcome::Updated | StepOutcome::Migrated { .. }
        )
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Unchanged => f.write_str("unchanged"),
            StepOutcome::Created => f.write_str("created"),
            StepOutcome::Updated => f.write_str("updated"),
            StepOutcome::Migrated { sidecar } => {
                write!(f, "migrated (new default at {})", sidecar.display())
            }
            StepOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: Step,
    pub target: String,
    pub outcome: StepOutcome,
}

/// Everything a run did, in order.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub records: Vec<StepRecord>,
    /// Messages the operator has to act on.
    pub notices: Vec<String>,
}

impl ProvisionReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            dry_run,
            records: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn record(&mut self, step: Step, target: impl Into<String>, outcome: StepOutcome) {
        let target = target.into();
        match &outcome {
            StepOutcome::Skipped { .. } => log::debug!("[{step}] {target}: {outcome}"),
            _ => log::info!("[{step}] {target}: {outcome}"),
        }
        self.records.push(StepRecord {
            step,
            target,
            outcome,
        });
    }

    pub fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.notices.push(message);
    }

    /// Records for one step.
    pub fn for_step(&self, step: Step) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(move |r| r.step == step)
    }

    pub fn outcome_of(&self, step: Step, target: &str) -> Option<&StepOutcome> {
        self.records
            .iter()
            .find(|r| r.step == step && r.target == target)
            .map(|r| &r.outcome)
    }

    pub fn changes(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_change()).count()
    }
}
