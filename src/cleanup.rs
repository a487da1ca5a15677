//! Removal of stale compiled bytecode under the installation tree.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ProvisionError, Result};

/// Files under `root` whose extension is one of `extensions`.
pub fn stale_files(root: &Path, extensions: &[String]) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("skipping unreadable entry under {}: {err}", root.display());
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| extensions.iter().any(|want| want == x))
        })
        .map(|e| e.into_path())
        .collect()
}

/// Delete stale files; returns how many were (or would be) removed.
pub fn remove_stale(root: &Path, extensions: &[String], dry_run: bool) -> Result<usize> {
    if !root.is_dir() {
        return Ok(0);
    }
    let files = stale_files(root, extensions);
    if !dry_run {
        for file in &files {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ProvisionError::io(file, e)),
            }
        }
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_only_bytecode() {
        let root = tempfile::tempdir().unwrap();
        let pkg = root.path().join("openquake/engine");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("__init__.py"), "").unwrap();
        fs::write(pkg.join("__init__.pyc"), "").unwrap();
        fs::write(root.path().join("calc.pyc"), "").unwrap();

        let exts = vec!["pyc".to_string()];
        assert_eq!(remove_stale(root.path(), &exts, true).unwrap(), 2);
        assert!(pkg.join("__init__.pyc").exists());

        assert_eq!(remove_stale(root.path(), &exts, false).unwrap(), 2);
        assert!(!pkg.join("__init__.pyc").exists());
        assert!(pkg.join("__init__.py").exists());
        assert_eq!(remove_stale(root.path(), &exts, false).unwrap(), 0);
    }

    #[test]
    fn missing_root_is_fine() {
        let root = tempfile::tempdir().unwrap();
        let exts = vec!["pyc".to_string()];
        assert_eq!(remove_stale(&root.path().join("nope"), &exts, false).unwrap(), 0);
    }
}
