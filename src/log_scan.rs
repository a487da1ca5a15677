//! Error scan over the database creation log.

use std::fs;
use std::path::Path;

use crate::error::{ProvisionError, Result};

/// Flags log lines that carry an error marker and are not known to be benign.
#[derive(Debug, Clone)]
pub struct LogScanner {
    marker: String,
    benign: Vec<String>,
}

impl LogScanner {
    /// `marker` matches case-insensitively; `benign` patterns match verbatim.
    pub fn new(marker: &str, benign: &[String]) -> Self {
        Self {
            marker: marker.to_lowercase(),
            benign: benign.to_vec(),
        }
    }

    pub fn offending_lines(&self, log: &str) -> Vec<String> {
        log.lines()
            .filter(|line| line.to_lowercase().contains(&self.marker))
            .filter(|line| !self.benign.iter().any(|b| line.contains(b.as_str())))
            .map(str::to_string)
            .collect()
    }

    /// Scan `path`, failing with [`ProvisionError::DatabaseInit`] on any hit.
    pub fn check_file(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| ProvisionError::io(path, e))?;
        let lines = self.offending_lines(&String::from_utf8_lossy(&bytes));
        if lines.is_empty() {
            return Ok(());
        }
        Err(ProvisionError::DatabaseInit {
            log: path.to_path_buf(),
            lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> LogScanner {
        let benign: Vec<String> = [
            "is not empty",
            "error_msg_",
            "already exists",
            "SET client_min_messages TO ERROR",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        LogScanner::new("error", &benign)
    }

    #[test]
    fn benign_matches_pass() {
        let log = "\
CREATE TABLE
NOTICE: directory \"/var/lib/openquake\" is not empty
    error_msg_ TEXT,
ERROR:  role \"oq_admin\" already exists
SET client_min_messages TO ERROR;
";
        assert!(scanner().offending_lines(log).is_empty());
    }

    #[test]
    fn unrelated_error_is_reported() {
        let log = "CREATE TABLE\nERROR:  syntax error at or near \"TABEL\"\n";
        assert_eq!(
            scanner().offending_lines(log),
            vec!["ERROR:  syntax error at or near \"TABEL\""]
        );
    }

    #[test]
    fn marker_is_case_insensitive() {
        assert_eq!(scanner().offending_lines("Fatal Error\n").len(), 1);
    }

    #[test]
    fn configured_allowlist_is_honoured() {
        let scanner = LogScanner::new("error", &["harmless".to_string()]);
        assert!(scanner.offending_lines("harmless error\n").is_empty());
        assert_eq!(scanner.offending_lines("error_msg_\n").len(), 1);
    }

    #[test]
    fn check_file_reports_path_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("db.log");
        std::fs::write(&log, "ok\npsql: error: connection refused\n").unwrap();

        match scanner().check_file(&log) {
            Err(ProvisionError::DatabaseInit { log: p, lines }) => {
                assert_eq!(p, log);
                assert_eq!(lines.len(), 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
