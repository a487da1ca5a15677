//! Filesystem layout and managed config file migration.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::file_ops::{set_mode, write_file_atomic};
use crate::outcome::StepOutcome;

const CONFIG_FILE_MODE: u32 = 0o644;

/// Make sure `dir` exists with exactly `mode` permission bits.
pub fn ensure_dir(dir: &Path, mode: u32, dry_run: bool) -> Result<StepOutcome> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {
            if meta.permissions().mode() & 0o7777 == mode {
                return Ok(StepOutcome::Unchanged);
            }
            if !dry_run {
                set_mode(dir, mode)?;
            }
            Ok(StepOutcome::Updated)
        }
        Ok(_) => Err(ProvisionError::System(format!(
            "{} exists but is not a directory",
            dir.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if !dry_run {
                fs::create_dir_all(dir).map_err(|e| ProvisionError::io(dir, e))?;
                set_mode(dir, mode)?;
            }
            Ok(StepOutcome::Created)
        }
        Err(e) => Err(ProvisionError::io(dir, e)),
    }
}

/// Path of the sidecar that carries a new packaged default.
pub fn sidecar_path(installed: &Path, suffix: &str) -> PathBuf {
    let mut name = installed
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    installed.with_file_name(name)
}

/// Install or migrate one managed config file.
///
/// - missing locally: copy the packaged default, mode 644
/// - identical: nothing to do
/// - different: keep the local copy, write the default beside it with `suffix`
pub fn migrate_config(
    packaged: &Path,
    installed: &Path,
    suffix: &str,
    dry_run: bool,
) -> Result<StepOutcome> {
    let default = fs::read(packaged).map_err(|e| ProvisionError::io(packaged, e))?;

    let local = match fs::read(installed) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if !dry_run {
                write_file_atomic(installed, &default, CONFIG_FILE_MODE)?;
            }
            return Ok(StepOutcome::Created);
        }
        Err(e) => return Err(ProvisionError::io(installed, e)),
    };

    if local == default {
        return Ok(StepOutcome::Unchanged);
    }

    let sidecar = sidecar_path(installed, suffix);
    if !dry_run {
        write_file_atomic(&sidecar, &default, CONFIG_FILE_MODE)?;
    }
    Ok(StepOutcome::Migrated { sidecar })
}
