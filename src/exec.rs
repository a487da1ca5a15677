//! Thin wrappers around `std::process::Command` for the host tools.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::error::{ProvisionError, Result};

/// Render a command for logs and error messages.
pub(crate) fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` and fail unless it exits successfully.
pub(crate) fn run(cmd: &mut Command) -> Result<Output> {
    let output = run_unchecked(cmd)?;
    if !output.status.success() {
        return Err(ProvisionError::Command {
            command: describe(cmd),
            detail: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output)
}

/// Run `cmd` and hand back whatever it produced, whatever the exit status.
pub(crate) fn run_unchecked(cmd: &mut Command) -> Result<Output> {
    log::debug!("exec: {}", describe(cmd));
    cmd.output().map_err(|e| ProvisionError::Command {
        command: describe(cmd),
        detail: e.to_string(),
    })
}

/// Run `cmd` feeding `input` on stdin; the input is kept out of the logs.
pub(crate) fn run_with_input(cmd: &mut Command, input: &[u8]) -> Result<Output> {
    let command = describe(cmd);
    log::debug!("exec: {command} (with stdin)");
    let fail = |detail: String| ProvisionError::Command {
        command: command.clone(),
        detail,
    };

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| fail(e.to_string()))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input).map_err(|e| fail(e.to_string()))?;
    }
    let output = child.wait_with_output().map_err(|e| fail(e.to_string()))?;

    if !output.status.success() {
        return Err(fail(format!(
            "{}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output)
}

pub(crate) fn stdout_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// A tool is present if the given path exists, or for bare names, if it is on `PATH`.
pub fn tool_present(tool: &Path) -> bool {
    if tool.components().count() > 1 {
        tool.exists()
    } else {
        which::which(tool).is_ok()
    }
}
