//! Extract `.rpa` archives and decompile `.rpyc` bytecode in place.

use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::bootstrap::{InstallOptions, ensure_tool};
use crate::config::PortConfig;
use crate::error::PortError;
use crate::filesystem::{collect_files, remove_files};
use crate::runtime::{ResolvedPaths, ensure_game_dir};
use crate::tools::{Tool, ToolKind};

pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DECOMPILE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnpackReport {
    pub archives_found: usize,
    pub archives_extracted: usize,
    pub scripts_found: usize,
    pub scripts_decompiled: usize,
    pub archives_deleted: usize,
    pub scripts_deleted: usize,
    pub failures: Vec<String>,
}

impl UnpackReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Resolve (or install) rpatool and unrpyc, then unpack the game directory.
pub fn run_unpack(
    paths: &ResolvedPaths,
    config: &PortConfig,
    options: InstallOptions,
) -> Result<UnpackReport> {
    ensure_game_dir(paths)?;
    let rpatool = ensure_tool(
        ToolKind::Rpatool,
        paths,
        &config.tools,
        &config.downloads,
        options,
    )?;
    let unrpyc = ensure_tool(
        ToolKind::Unrpyc,
        paths,
        &config.tools,
        &config.downloads,
        options,
    )?;
    unpack(paths, &rpatool, &unrpyc)
}

/// A failed extraction or decompile marks the run failed; later steps still run.
pub fn unpack(paths: &ResolvedPaths, rpatool: &Tool, unrpyc: &Tool) -> Result<UnpackReport> {
    ensure_game_dir(paths)?;
    let game_dir = &paths.game_dir;
    let mut report = UnpackReport::default();

    info!("step 1/4: extracting .rpa archives");
    let archives = collect_files(game_dir, &["rpa"])?;
    report.archives_found = archives.len();
    for archive in &archives {
        match extract_archive(rpatool, archive, game_dir) {
            Ok(()) => report.archives_extracted += 1,
            Err(error) => record(&mut report, paths, archive, error),
        }
    }

    info!("step 2/4: decompiling .rpyc scripts");
    let scripts = collect_files(game_dir, &["rpyc"])?;
    report.scripts_found = scripts.len();
    for script in &scripts {
        match decompile_script(unrpyc, script) {
            Ok(()) => report.scripts_decompiled += 1,
            Err(error) => record(&mut report, paths, script, error),
        }
    }
    info!(
        "decompiled {}/{} script(s)",
        report.scripts_decompiled, report.scripts_found
    );

    // Rescan: extraction can surface nested archives and bytecode.
    info!("step 3/4: deleting residual .rpa archives");
    let removed = remove_files(&collect_files(game_dir, &["rpa"])?);
    report.archives_deleted = removed.deleted.len();
    report.failures.extend(removed.failed);

    info!("step 4/4: deleting .rpyc scripts");
    let removed = remove_files(&collect_files(game_dir, &["rpyc"])?);
    report.scripts_deleted = removed.deleted.len();
    report.failures.extend(removed.failed);

    Ok(report)
}

fn record(report: &mut UnpackReport, paths: &ResolvedPaths, file: &Path, error: anyhow::Error) {
    let message = format!("{}: {error:#}", paths.relative_display(file));
    warn!("{message}");
    report.failures.push(message);
}

fn extract_archive(rpatool: &Tool, archive: &Path, game_dir: &Path) -> Result<()> {
    info!("unpacking {}", archive.display());
    rpatool.run_checked(
        [
            OsStr::new("-x"),
            archive.as_os_str(),
            OsStr::new("-o"),
            game_dir.as_os_str(),
        ],
        Some(EXTRACT_TIMEOUT),
    )?;
    Ok(())
}

fn decompile_script(unrpyc: &Tool, script: &Path) -> Result<()> {
    info!("decompiling {}", script.display());
    let output = unrpyc.run([script.as_os_str()], Some(DECOMPILE_TIMEOUT))?;
    if output.success() {
        return Ok(());
    }
    if output.mentions("already exists") {
        info!("already decompiled: {}", script.display());
        return Ok(());
    }
    Err(PortError::ToolFailed {
        tool: "unrpyc".to_string(),
        code: output.code,
        stderr: output.stderr.trim().to_string(),
    }
    .into())
}
