//! `.backup` sidecars that make in-place text rewrites restorable.
//!
//! A sidecar is written once from the pristine file and never overwritten, so
//! restoring it before every rewrite keeps repeated runs from compounding.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

pub const BACKUP_SUFFIX: &str = ".backup";

pub fn backup_path(file: &Path) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `file` to its sidecar unless one already exists. Returns `true` when written.
pub fn create_backup(file: &Path) -> Result<bool> {
    let backup = backup_path(file);
    if backup.exists() {
        debug!("backup already exists: {}", backup.display());
        return Ok(false);
    }
    fs::copy(file, &backup).with_context(|| {
        format!(
            "failed to copy {} to {}",
            file.display(),
            backup.display()
        )
    })?;
    debug!("backup created: {}", backup.display());
    Ok(true)
}

/// Overwrite `file` with its sidecar if present. Returns `true` when restored.
pub fn restore_backup(file: &Path) -> Result<bool> {
    let backup = backup_path(file);
    if !backup.exists() {
        return Ok(false);
    }
    fs::copy(&backup, file).with_context(|| {
        format!(
            "failed to restore {} from {}",
            file.display(),
            backup.display()
        )
    })?;
    debug!("restored from backup: {}", file.display());
    Ok(true)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PristineState {
    pub restored: bool,
    pub backup_created: bool,
}

/// Bring `file` back to its pristine contents (when allowed) and make sure a sidecar exists.
pub fn prepare_pristine(file: &Path, auto_restore: bool) -> Result<PristineState> {
    let restored = if auto_restore {
        restore_backup(file)?
    } else {
        false
    };
    let backup_created = create_backup(file)?;
    Ok(PristineState {
        restored,
        backup_created,
    })
}

/// Contents the next rewrite should start from, without touching the filesystem.
pub fn read_pristine(file: &Path, auto_restore: bool) -> Result<String> {
    let backup = backup_path(file);
    let source = if auto_restore && backup.exists() {
        backup
    } else {
        file.to_path_buf()
    };
    fs::read_to_string(&source).with_context(|| format!("failed to read {}", source.display()))
}
