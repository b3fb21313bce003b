//! Fetch missing tools into the project's `tools/` directory.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::config::{DownloadSection, ToolSection};
use crate::error::PortError;
use crate::runtime::{ResolvedPaths, normalize_for_display};
use crate::tools::{Tool, ToolKind, locate, require};

pub const CLONE_TIMEOUT: Duration = Duration::from_secs(60);
pub const PIP_TIMEOUT: Duration = Duration::from_secs(120);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const USER_AGENT: &str = concat!("vitaport/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Skip the interactive prompt.
    pub assume_yes: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub tool: ToolKind,
    pub installed: bool,
    pub already_present: bool,
    pub path: Option<String>,
    pub error: Option<String>,
}

/// Ask on a terminal. Without one, `non_interactive` is the answer.
pub fn confirm(question: &str, options: InstallOptions, non_interactive: bool) -> Result<bool> {
    if options.assume_yes {
        return Ok(true);
    }
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return Ok(non_interactive);
    }
    print!("{question} (y/n): ");
    io::stdout().flush().context("failed to flush stdout")?;
    let mut answer = String::new();
    stdin
        .read_line(&mut answer)
        .context("failed to read confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

pub fn manual_instructions(kind: ToolKind, downloads: &DownloadSection) -> String {
    match kind {
        ToolKind::Rpatool => format!(
            "git clone {} tools/rpatool && python -m pip install -e tools/rpatool",
            downloads.rpatool_repo
        ),
        ToolKind::Unrpyc => format!(
            "git clone {} tools/unrpyc && python -m pip install -e tools/unrpyc",
            downloads.unrpyc_repo
        ),
        ToolKind::Ffmpeg => format!(
            "download {} (or https://ffmpeg.org/download.html) and place the ffmpeg executable in tools/",
            downloads.ffmpeg_url
        ),
        ToolKind::Pngquant => format!(
            "download {} (or https://pngquant.org/) and place the pngquant executable in tools/",
            downloads.pngquant_url
        ),
        ToolKind::Git => "install git from https://git-scm.com/".to_string(),
        ToolKind::Python => "install python 3 from https://www.python.org/".to_string(),
    }
}

/// Return the tool, installing it after confirmation when missing.
pub fn ensure_tool(
    kind: ToolKind,
    paths: &ResolvedPaths,
    tools: &ToolSection,
    downloads: &DownloadSection,
    options: InstallOptions,
) -> Result<Tool> {
    if let Some(tool) = locate(kind, paths, tools) {
        return Ok(tool);
    }
    warn!("{} not found", kind.name());

    let (question, non_interactive) = if kind.is_script() {
        (format!("Install {} with git and pip?", kind.name()), false)
    } else {
        (
            format!("Download {} from {}?", kind.name(), download_url(kind, downloads)?),
            true,
        )
    };
    if !confirm(&question, options, non_interactive)? {
        bail!(
            "{} is required; install it manually:\n  {}",
            kind.name(),
            manual_instructions(kind, downloads)
        );
    }

    install(kind, paths, tools, downloads).with_context(|| {
        format!(
            "failed to install {}; install it manually:\n  {}",
            kind.name(),
            manual_instructions(kind, downloads)
        )
    })
}

pub fn install(
    kind: ToolKind,
    paths: &ResolvedPaths,
    tools: &ToolSection,
    downloads: &DownloadSection,
) -> Result<Tool> {
    match kind {
        ToolKind::Rpatool => install_script_tool(kind, &downloads.rpatool_repo, paths, tools),
        ToolKind::Unrpyc => install_script_tool(kind, &downloads.unrpyc_repo, paths, tools),
        ToolKind::Ffmpeg | ToolKind::Pngquant => {
            install_binary_tool(kind, download_url(kind, downloads)?, paths, tools)
        }
        ToolKind::Git | ToolKind::Python => {
            Err(PortError::ToolUnavailable { tool: kind.name() }.into())
        }
    }
}

/// Install every missing tool that can be installed, recording failures instead of stopping.
pub fn install_missing(
    paths: &ResolvedPaths,
    tools: &ToolSection,
    downloads: &DownloadSection,
    options: InstallOptions,
) -> Vec<InstallReport> {
    let installable = [
        ToolKind::Rpatool,
        ToolKind::Unrpyc,
        ToolKind::Ffmpeg,
        ToolKind::Pngquant,
    ];
    installable
        .into_iter()
        .map(|kind| {
            if let Some(tool) = locate(kind, paths, tools) {
                return InstallReport {
                    tool: kind,
                    installed: false,
                    already_present: true,
                    path: Some(tool.display()),
                    error: None,
                };
            }
            match ensure_tool(kind, paths, tools, downloads, options) {
                Ok(tool) => InstallReport {
                    tool: kind,
                    installed: true,
                    already_present: false,
                    path: Some(tool.display()),
                    error: None,
                },
                Err(error) => InstallReport {
                    tool: kind,
                    installed: false,
                    already_present: false,
                    path: None,
                    error: Some(format!("{error:#}")),
                },
            }
        })
        .collect()
}

fn download_url(kind: ToolKind, downloads: &DownloadSection) -> Result<&str> {
    match kind {
        ToolKind::Ffmpeg => Ok(&downloads.ffmpeg_url),
        ToolKind::Pngquant => Ok(&downloads.pngquant_url),
        _ => bail!("{} is not distributed as a download", kind.name()),
    }
}

fn install_script_tool(
    kind: ToolKind,
    repo: &str,
    paths: &ResolvedPaths,
    tools: &ToolSection,
) -> Result<Tool> {
    let git = require(ToolKind::Git, paths, tools)?;
    let python = require(ToolKind::Python, paths, tools)?;

    fs::create_dir_all(&paths.tools_dir)
        .with_context(|| format!("failed to create {}", paths.tools_dir.display()))?;
    let clone_dir = paths.tools_dir.join(kind.name());
    if clone_dir.exists() {
        info!("removing existing {}", normalize_for_display(&clone_dir));
        fs::remove_dir_all(&clone_dir)
            .with_context(|| format!("failed to remove {}", clone_dir.display()))?;
    }

    info!("cloning {repo}");
    git.run_checked(
        [OsStr::new("clone"), OsStr::new(repo), clone_dir.as_os_str()],
        Some(CLONE_TIMEOUT),
    )?;

    info!("installing {} with pip", kind.name());
    python.run_checked(
        [
            OsStr::new("-m"),
            OsStr::new("pip"),
            OsStr::new("install"),
            OsStr::new("-e"),
            clone_dir.as_os_str(),
        ],
        Some(PIP_TIMEOUT),
    )?;

    locate(kind, paths, tools).ok_or_else(|| {
        anyhow::anyhow!(
            "{} was cloned but is still not discoverable under {}",
            kind.name(),
            normalize_for_display(&paths.tools_dir)
        )
    })
}

fn install_binary_tool(
    kind: ToolKind,
    url: &str,
    paths: &ResolvedPaths,
    tools: &ToolSection,
) -> Result<Tool> {
    let staging = TempDir::new().context("failed to create download directory")?;
    let archive_path = staging.path().join(format!("{}.zip", kind.name()));

    info!("downloading {url}");
    download(url, &archive_path)?;

    fs::create_dir_all(&paths.tools_dir)
        .with_context(|| format!("failed to create {}", paths.tools_dir.display()))?;
    let installed = extract_executable(&archive_path, kind, &paths.tools_dir)?;
    info!("installed {}", normalize_for_display(&installed));

    let tool = locate(kind, paths, tools).ok_or_else(|| PortError::ToolUnavailable {
        tool: kind.name(),
    })?;
    if !tool.probe() {
        bail!("{} was installed but does not run", tool.display());
    }
    Ok(tool)
}

fn download(url: &str, destination: &Path) -> Result<()> {
    let client = Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build download HTTP client")?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to download {url}"))?
        .error_for_status()
        .with_context(|| format!("download failed: {url}"))?;
    let file = File::create(destination)
        .with_context(|| format!("failed to create {}", destination.display()))?;
    let mut writer = BufWriter::new(file);
    response
        .copy_to(&mut writer)
        .with_context(|| format!("failed to write {}", destination.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to write {}", destination.display()))?;
    Ok(())
}

/// Copy the first archive entry named like the tool's executable into `target_dir`.
pub fn extract_executable(
    archive_path: &Path,
    kind: ToolKind,
    target_dir: &Path,
) -> Result<PathBuf> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read zip {}", archive_path.display()))?;

    let wanted = kind.local_candidates(target_dir);
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| {
                format!("failed to read entry {index} of {}", archive_path.display())
            })?;
        if entry.is_dir() {
            continue;
        }
        let Some(file_name) = Path::new(entry.name()).file_name().map(|name| name.to_owned()) else {
            continue;
        };
        let Some(destination) = wanted.iter().find(|candidate| {
            candidate
                .file_name()
                .is_some_and(|name| name.eq_ignore_ascii_case(&file_name))
        }) else {
            continue;
        };

        let mut output = File::create(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;
        io::copy(&mut entry, &mut output)
            .with_context(|| format!("failed to extract {}", destination.display()))?;
        mark_executable(destination)?;
        return Ok(destination.clone());
    }

    bail!(
        "{} not found in {}",
        kind.name(),
        normalize_for_display(archive_path)
    )
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("failed to mark {} executable", path.display()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
