use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;

use crate::config::render_default_config;

pub const CONFIG_FILENAME: &str = "vitaport.toml";
pub const SCRIPTS_DIRNAME: &str = "scripts_for_vita";
pub const TOOLS_DIRNAME: &str = "tools";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

/// Fixed project layout every command works against.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub game_dir: PathBuf,
    pub images_dir: PathBuf,
    pub gui_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub config_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Layout rooted at `project_root` with every other path at its default.
    pub fn for_root(project_root: &Path) -> Self {
        let game_dir = project_root.join("game");
        let scripts_dir = project_root.join(SCRIPTS_DIRNAME);
        Self {
            images_dir: game_dir.join("images"),
            gui_dir: game_dir.join("gui"),
            audio_dir: game_dir.join("audio"),
            tools_dir: project_root.join(TOOLS_DIRNAME),
            config_path: scripts_dir.join(CONFIG_FILENAME),
            game_dir,
            scripts_dir,
            project_root: project_root.to_path_buf(),
            root_source: ValueSource::Flag,
            config_source: ValueSource::Default,
        }
    }

    pub fn gui_script(&self) -> PathBuf {
        self.game_dir.join("gui.rpy")
    }

    pub fn screens_script(&self) -> PathBuf {
        self.game_dir.join("screens.rpy")
    }

    /// Display path relative to the project root, falling back to the full path.
    pub fn relative_display(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.project_root).unwrap_or(path);
        normalize_for_display(relative)
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\ngame_dir={}\nimages_dir={}\ngui_dir={}\naudio_dir={}\nscripts_dir={}\ntools_dir={}\nconfig_path={} ({})",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.game_dir),
            normalize_for_display(&self.images_dir),
            normalize_for_display(&self.gui_dir),
            normalize_for_display(&self.audio_dir),
            normalize_for_display(&self.scripts_dir),
            normalize_for_display(&self.tools_dir),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub game_exists: bool,
    pub images_exists: bool,
    pub gui_exists: bool,
    pub audio_exists: bool,
    pub scripts_dir_exists: bool,
    pub tools_dir_exists: bool,
    pub config_exists: bool,
    pub backups: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let game_exists = paths.game_dir.is_dir();
    let images_exists = paths.images_dir.is_dir();
    let gui_exists = paths.gui_dir.is_dir();
    let audio_exists = paths.audio_dir.is_dir();

    let mut backups = Vec::new();
    for script in [paths.gui_script(), paths.screens_script()] {
        let backup = crate::backup::backup_path(&script);
        if backup.exists() {
            backups.push(paths.relative_display(&backup));
        }
    }

    let mut warnings = Vec::new();
    if !game_exists {
        warnings.push("game/ is missing; point --project-root at the game project".to_string());
    }
    if game_exists && !images_exists {
        warnings.push("game/images/ is missing; image optimization will skip it".to_string());
    }
    if game_exists && !gui_exists {
        warnings.push("game/gui/ is missing; image optimization will skip it".to_string());
    }
    if game_exists && !audio_exists {
        warnings.push("game/audio/ is missing; audio optimization will fail".to_string());
    }
    if !paths.tools_dir.is_dir() {
        warnings.push(
            "tools/ is missing; run `vitaport init` or `vitaport deps install`".to_string(),
        );
    }

    Ok(RuntimeStatus {
        project_root_exists: paths.project_root.exists(),
        game_exists,
        images_exists,
        gui_exists,
        audio_exists,
        scripts_dir_exists: paths.scripts_dir.is_dir(),
        tools_dir_exists: paths.tools_dir.is_dir(),
        config_exists: paths.config_path.exists(),
        backups,
        warnings,
    })
}

pub fn ensure_game_dir(paths: &ResolvedPaths) -> Result<()> {
    if !paths.game_dir.is_dir() {
        bail!(
            "Game directory does not exist: {}\nRun from the project root or pass --project-root <dir containing game/>",
            normalize_for_display(&paths.game_dir)
        );
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env)
        .context("failed to resolve project root")?;

    let mut paths = ResolvedPaths::for_root(&project_root);
    paths.root_source = root_source;

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = lookup_env("VITAPORT_CONFIG") {
        (
            absolutize(Path::new(value.trim()), &project_root),
            ValueSource::Env,
        )
    } else {
        (paths.config_path.clone(), ValueSource::Default)
    };
    paths.config_path = config_path;
    paths.config_source = config_source;

    Ok(paths)
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.scripts_dir, &paths.tools_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = write_default_config(&paths.config_path, options.force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> Result<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return Ok((absolutize(path, &context.cwd), ValueSource::Flag));
    }

    if let Some(value) = lookup_env("VITAPORT_PROJECT_ROOT") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok((absolutize(Path::new(trimmed), &context.cwd), ValueSource::Env));
        }
    }

    match find_game_root(&context.cwd, context.executable_dir.as_deref()) {
        Some(root) => Ok((root, ValueSource::Heuristic)),
        None => Ok((context.cwd.clone(), ValueSource::Default)),
    }
}

/// First ancestor of the working directory, then of the executable, that holds a `game/` folder.
fn find_game_root(cwd: &Path, executable_dir: Option<&Path>) -> Option<PathBuf> {
    cwd.ancestors()
        .chain(executable_dir.into_iter().flat_map(Path::ancestors))
        .find(|dir| dir.join("game").is_dir())
        .map(Path::to_path_buf)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    base.join(path)
}

/// Returns false when the config exists and `force` is off.
fn write_default_config(config_path: &Path, force: bool) -> Result<bool> {
    if config_path.exists() && !force {
        return Ok(false);
    }
    if let Some(dir) = config_path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    fs::write(config_path, render_default_config()?)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
