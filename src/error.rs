//! Error types for the provisioner.

use std::path::PathBuf;

use thiserror::Error;

/// Everything that can stop a provisioning run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The host runs a release we have no PostgreSQL mapping for.
    #[error("Unsupported OS release: {0}")]
    UnsupportedRelease(String),

    /// The database creation log contains unexplained error lines.
    #[error("Failed to initialise the database ({} error line(s) in {})", lines.len(), log.display())]
    DatabaseInit { log: PathBuf, lines: Vec<String> },

    /// An external tool could not be run or exited unsuccessfully.
    #[error("Command `{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid provisioner configuration: {0}")]
    Config(String),

    #[error("Invalid settings file {}: line {line}: {message}", path.display())]
    Settings {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{0}")]
    System(String),
}

impl ProvisionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;
