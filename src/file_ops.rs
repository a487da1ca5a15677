//! Atomic file operations for managed configuration.
//!
//! Writes go to a temp file in the target's directory and are renamed into
//! place, so a reader never sees a half-written config.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{ProvisionError, Result};

/// Write file atomically with the given permission bits.
pub(crate) fn write_file_atomic(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ProvisionError::System(format!("{} has no parent", path.display())))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ProvisionError::io(dir, e))?;
    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ProvisionError::io(tmp.path(), e))?;
    set_mode(tmp.path(), mode)?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::io(path, e.error))?;

    Ok(())
}

/// Current permission bits (including setuid/setgid/sticky).
pub(crate) fn mode_of(path: &Path) -> Result<u32> {
    let meta = fs::metadata(path).map_err(|e| ProvisionError::io(path, e))?;
    Ok(meta.permissions().mode() & 0o7777)
}

pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| ProvisionError::io(path, e))
}
