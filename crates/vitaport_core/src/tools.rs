//! Discovery and invocation of the external tools the pipelines shell out to.

use std::env;
use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::config::ToolSection;
use crate::error::PortError;
use crate::runtime::{ResolvedPaths, normalize_for_display};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Ffmpeg,
    Pngquant,
    Rpatool,
    Unrpyc,
    Git,
    Python,
}

impl ToolKind {
    pub const ALL: [ToolKind; 6] = [
        Self::Ffmpeg,
        Self::Pngquant,
        Self::Rpatool,
        Self::Unrpyc,
        Self::Git,
        Self::Python,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ffmpeg => "ffmpeg",
            Self::Pngquant => "pngquant",
            Self::Rpatool => "rpatool",
            Self::Unrpyc => "unrpyc",
            Self::Git => "git",
            Self::Python => "python",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            Self::Ffmpeg => "VITAPORT_FFMPEG",
            Self::Pngquant => "VITAPORT_PNGQUANT",
            Self::Rpatool => "VITAPORT_RPATOOL",
            Self::Unrpyc => "VITAPORT_UNRPYC",
            Self::Git => "VITAPORT_GIT",
            Self::Python => "VITAPORT_PYTHON",
        }
    }

    /// Python scripts run through the interpreter rather than directly.
    pub fn is_script(self) -> bool {
        matches!(self, Self::Rpatool | Self::Unrpyc)
    }

    pub fn probe_args(self) -> &'static [&'static str] {
        match self {
            Self::Ffmpeg => &["-version"],
            Self::Rpatool | Self::Unrpyc => &["--help"],
            Self::Pngquant | Self::Git | Self::Python => &["--version"],
        }
    }

    fn executable_names(self) -> &'static [&'static str] {
        if cfg!(windows) {
            match self {
                Self::Ffmpeg => &["ffmpeg.exe"],
                Self::Pngquant => &["pngquant.exe"],
                Self::Rpatool => &["rpatool.exe", "rpatool.cmd", "rpatool"],
                Self::Unrpyc => &["unrpyc.exe", "unrpyc.cmd", "unrpyc"],
                Self::Git => &["git.exe", "git.cmd"],
                Self::Python => &["python.exe", "py.exe", "python3.exe"],
            }
        } else {
            match self {
                Self::Ffmpeg => &["ffmpeg"],
                Self::Pngquant => &["pngquant"],
                Self::Rpatool => &["rpatool"],
                Self::Unrpyc => &["unrpyc"],
                Self::Git => &["git"],
                Self::Python => &["python3", "python"],
            }
        }
    }

    /// Where `deps install` puts the tool inside a project directory.
    pub fn local_candidates(self, dir: &Path) -> Vec<PathBuf> {
        match self {
            Self::Rpatool => vec![dir.join("rpatool").join("rpatool")],
            Self::Unrpyc => vec![dir.join("unrpyc").join("unrpyc.py")],
            Self::Git | Self::Python => Vec::new(),
            Self::Ffmpeg | Self::Pngquant => self
                .executable_names()
                .iter()
                .map(|name| dir.join(name))
                .collect(),
        }
    }

    fn configured(self, config: &ToolSection) -> Option<&Path> {
        match self {
            Self::Ffmpeg => config.ffmpeg.as_deref(),
            Self::Pngquant => config.pngquant.as_deref(),
            Self::Rpatool => config.rpatool.as_deref(),
            Self::Unrpyc => config.unrpyc.as_deref(),
            Self::Git => config.git.as_deref(),
            Self::Python => config.python.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Env,
    Config,
    Tools,
    Scripts,
    Path,
}

impl ToolSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::Config => "config",
            Self::Tools => "tools",
            Self::Scripts => "scripts",
            Self::Path => "path",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    pub kind: ToolKind,
    pub path: PathBuf,
    pub source: ToolSource,
    /// Set when `path` is a script that has to run through python.
    pub interpreter: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.stdout.to_ascii_lowercase().contains(&needle)
            || self.stderr.to_ascii_lowercase().contains(&needle)
    }
}

impl Tool {
    pub fn command(&self) -> Command {
        match &self.interpreter {
            Some(python) => {
                let mut command = Command::new(python);
                command.arg(&self.path);
                command
            }
            None => Command::new(&self.path),
        }
    }

    pub fn display(&self) -> String {
        normalize_for_display(&self.path)
    }

    /// Run with captured output.
    /// A timeout kills the child and fails with [`PortError::ToolTimedOut`].
    pub fn run<I, S>(&self, args: I, timeout: Option<Duration>) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = self.command();
        command.args(args);
        run_command(self.kind.name(), command, timeout)
    }

    /// Same as [`Tool::run`] but a non-zero exit becomes [`PortError::ToolFailed`].
    pub fn run_checked<I, S>(&self, args: I, timeout: Option<Duration>) -> Result<ProcessOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args, timeout)?;
        if !output.success() {
            return Err(PortError::ToolFailed {
                tool: self.kind.name().to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }
        Ok(output)
    }

    pub fn probe(&self) -> bool {
        match self.run(self.kind.probe_args(), Some(PROBE_TIMEOUT)) {
            Ok(output) => output.success(),
            Err(error) => {
                debug!("{} probe failed: {error:#}", self.kind.name());
                false
            }
        }
    }
}

pub fn run_command(
    name: &str,
    mut command: Command,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    debug!("executing {command:?}");
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to execute {name}"))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(limit) => match child
            .wait_timeout(limit)
            .with_context(|| format!("failed to wait for {name}"))?
        {
            Some(status) => status,
            None => {
                kill(&mut child, name);
                return Err(PortError::ToolTimedOut {
                    tool: name.to_string(),
                    seconds: limit.as_secs(),
                }
                .into());
            }
        },
        None => child
            .wait()
            .with_context(|| format!("failed to wait for {name}"))?,
    };

    Ok(ProcessOutput {
        code: status.code().unwrap_or(1),
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn kill(child: &mut Child, name: &str) {
    if let Err(error) = child.kill() {
        warn!("failed to kill {name}: {error}");
    }
    let _ = child.wait();
}

fn drain<R>(stream: Option<R>) -> Option<thread::JoinHandle<String>>
where
    R: Read + Send + 'static,
{
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stream.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).to_string()
        })
    })
}

fn collect(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

pub fn locate(kind: ToolKind, paths: &ResolvedPaths, config: &ToolSection) -> Option<Tool> {
    locate_with_lookup(kind, paths, config, &|key| env::var(key).ok())
}

pub fn locate_with_lookup<F>(
    kind: ToolKind,
    paths: &ResolvedPaths,
    config: &ToolSection,
    lookup_env: &F,
) -> Option<Tool>
where
    F: Fn(&str) -> Option<String>,
{
    let (path, source) = find_path(kind, paths, config, lookup_env)?;
    let interpreter = if kind.is_script() && needs_interpreter(&path, source) {
        let python = locate_with_lookup(ToolKind::Python, paths, config, lookup_env)?;
        Some(python.path)
    } else {
        None
    };
    Some(Tool {
        kind,
        path,
        source,
        interpreter,
    })
}

/// Locate or fail with [`PortError::ToolUnavailable`].
pub fn require(kind: ToolKind, paths: &ResolvedPaths, config: &ToolSection) -> Result<Tool> {
    locate(kind, paths, config)
        .ok_or_else(|| PortError::ToolUnavailable { tool: kind.name() }.into())
}

fn find_path<F>(
    kind: ToolKind,
    paths: &ResolvedPaths,
    config: &ToolSection,
    lookup_env: &F,
) -> Option<(PathBuf, ToolSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(env_path) = lookup_env(kind.env_var())
        .map(|value| PathBuf::from(value.trim()))
        .filter(|path| path.exists())
    {
        return Some((env_path, ToolSource::Env));
    }

    if let Some(configured) = kind.configured(config) {
        let configured = if configured.is_absolute() {
            configured.to_path_buf()
        } else {
            paths.project_root.join(configured)
        };
        if configured.exists() {
            return Some((configured, ToolSource::Config));
        }
        warn!(
            "configured {} path does not exist: {}",
            kind.name(),
            normalize_for_display(&configured)
        );
    }

    for (dir, source) in [
        (&paths.tools_dir, ToolSource::Tools),
        (&paths.scripts_dir, ToolSource::Scripts),
    ] {
        if let Some(found) = kind
            .local_candidates(dir)
            .into_iter()
            .find(|candidate| candidate.is_file())
        {
            return Some((found, source));
        }
    }

    let path_var = lookup_env("PATH")?;
    for part in env::split_paths(&path_var) {
        let candidate_dir = PathBuf::from(strip_wrapping_quotes(&part.to_string_lossy()));
        if candidate_dir.as_os_str().is_empty() {
            continue;
        }
        for name in kind.executable_names() {
            let candidate = candidate_dir.join(name);
            if candidate.is_file() {
                return Some((candidate, ToolSource::Path));
            }
        }
    }
    None
}

/// Checkouts under `tools/` ship bare scripts; `PATH` entries are pip-installed launchers.
fn needs_interpreter(path: &Path, source: ToolSource) -> bool {
    path.extension().and_then(OsStr::to_str) == Some("py")
        || matches!(source, ToolSource::Tools | ToolSource::Scripts)
}

fn strip_wrapping_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(value)
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: ToolKind,
    pub path: Option<String>,
    pub source: Option<ToolSource>,
    pub runnable: bool,
}

/// Locate every tool and probe the ones found.
pub fn check_tools(paths: &ResolvedPaths, config: &ToolSection) -> Vec<ToolStatus> {
    ToolKind::ALL
        .iter()
        .map(|kind| match locate(*kind, paths, config) {
            Some(tool) => ToolStatus {
                tool: *kind,
                path: Some(tool.display()),
                source: Some(tool.source),
                runnable: tool.probe(),
            },
            None => ToolStatus {
                tool: *kind,
                path: None,
                source: None,
                runnable: false,
            },
        })
        .collect()
}
