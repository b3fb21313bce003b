use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use vitaport_core::audio::{AudioReport, run_audio};
use vitaport_core::bootstrap::{InstallOptions, install_missing};
use vitaport_core::config::{PortConfig, load_config};
use vitaport_core::cutscenes::{CutsceneMode, CutsceneOptions, CutsceneReport, process_cutscenes};
use vitaport_core::filesystem::format_mib;
use vitaport_core::gui::optimize_gui;
use vitaport_core::images::{ImageMode, ImageOptions, ImageReport, run_images};
use vitaport_core::logging::init_cli_logger;
use vitaport_core::patch::optimize_particles;
use vitaport_core::rewrite::{FileRewriteReport, RewriteOptions};
use vitaport_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use vitaport_core::sysimg::generate_system_images;
use vitaport_core::tools::{ToolStatus, check_tools};
use vitaport_core::unpack::run_unpack;
use vitaport_core::workflow::{WorkflowKind, run_workflow};

#[derive(Debug, Parser)]
#[command(
    name = "vitaport",
    version,
    about = "Adapt a Ren'Py game project for the PS Vita's 960x544 screen"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create scripts_for_vita/ and tools/ and write the default config")]
    Init(InitArgs),
    #[command(about = "Report project layout and tool availability")]
    Status,
    #[command(about = "Check or install external tools")]
    Deps(DepsArgs),
    #[command(about = "Extract .rpa archives and decompile .rpyc scripts")]
    Unpack(InstallArgs),
    #[command(about = "Comment out (or restore) cutscene video references")]
    Cutscenes(CutscenesArgs),
    #[command(about = "Rescale gui.rpy and screens.rpy for 960x544")]
    Gui(GuiArgs),
    #[command(about = "Resize and recompress game images")]
    Images(ImagesArgs),
    #[command(about = "Re-encode game audio with ffmpeg")]
    Audio(InstallArgs),
    #[command(about = "Lighten the snow particle effect")]
    Particles,
    #[command(about = "Generate launcher images under sce_sys/")]
    Sysimg,
    #[command(about = "Run a fixed sequence of stages")]
    Workflow(WorkflowArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct DepsArgs {
    #[command(subcommand)]
    command: DepsSubcommand,
}

#[derive(Debug, Subcommand)]
enum DepsSubcommand {
    Check,
    Install(InstallArgs),
}

#[derive(Debug, Args)]
struct InstallArgs {
    #[arg(short, long, help = "Install missing tools without asking")]
    yes: bool,
}

impl InstallArgs {
    fn options(&self) -> InstallOptions {
        InstallOptions {
            assume_yes: self.yes,
        }
    }
}

#[derive(Debug, Args)]
struct CutscenesArgs {
    #[arg(long, help = "Report changes without writing or deleting")]
    dry_run: bool,
    #[arg(long, conflicts_with = "scan_only", help = "Uncomment previously commented references")]
    restore: bool,
    #[arg(long, help = "List videos and references only")]
    scan_only: bool,
}

#[derive(Debug, Args)]
struct GuiArgs {
    #[arg(long, help = "Rewrite the current file instead of the .backup original")]
    no_restore: bool,
    #[arg(long, help = "Print a diff without writing")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct ImagesArgs {
    #[arg(long, help = "Resize only; keep each file's format at high quality")]
    resize_only: bool,
    #[arg(long, help = "Skip pngquant and quantise PNGs in-process")]
    no_pngquant: bool,
    #[arg(short, long, help = "Install pngquant without asking")]
    yes: bool,
}

#[derive(Debug, Args)]
struct WorkflowArgs {
    #[arg(value_enum)]
    kind: WorkflowChoice,
    #[arg(short, long, help = "Install missing tools without asking")]
    yes: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WorkflowChoice {
    Lossless,
    TrueLossless,
}

impl From<WorkflowChoice> for WorkflowKind {
    fn from(choice: WorkflowChoice) -> Self {
        match choice {
            WorkflowChoice::Lossless => WorkflowKind::Lossless,
            WorkflowChoice::TrueLossless => WorkflowKind::TrueLossless,
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_cli_logger(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Deps(DepsArgs { command })) => match command {
            DepsSubcommand::Check => run_deps_check(&runtime),
            DepsSubcommand::Install(args) => run_deps_install(&runtime, args),
        },
        Some(Commands::Unpack(args)) => run_unpack_command(&runtime, args),
        Some(Commands::Cutscenes(args)) => run_cutscenes(&runtime, args),
        Some(Commands::Gui(args)) => run_gui(&runtime, args),
        Some(Commands::Images(args)) => run_images_command(&runtime, args),
        Some(Commands::Audio(args)) => run_audio_command(&runtime, args),
        Some(Commands::Particles) => run_particles(&runtime),
        Some(Commands::Sysimg) => run_sysimg(&runtime),
        Some(Commands::Workflow(args)) => run_workflow_command(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("Initialized vitaport layout");
        println!("project_root: {}", normalize_for_display(&paths.project_root));
        println!("scripts_dir: {}", normalize_for_display(&paths.scripts_dir));
        println!("tools_dir: {}", normalize_for_display(&paths.tools_dir));
        println!("config_path: {}", normalize_for_display(&paths.config_path));
        println!("created_dirs: {}", report.created_dirs.len());
        println!("wrote_config: {}", report.wrote_config);
        if !report.wrote_config {
            println!("note: config already exists (use --force to overwrite)");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let status = inspect_runtime(&paths)?;
    let tools = check_tools(&paths, &config.tools);

    if runtime.json {
        print_json(&serde_json::json!({ "runtime": status, "tools": tools }))?;
    } else {
        println!("runtime status");
        println!("project_root: {}", normalize_for_display(&paths.project_root));
        println!("game_exists: {}", format_flag(status.game_exists));
        println!("images_exists: {}", format_flag(status.images_exists));
        println!("gui_exists: {}", format_flag(status.gui_exists));
        println!("audio_exists: {}", format_flag(status.audio_exists));
        println!("scripts_dir_exists: {}", format_flag(status.scripts_dir_exists));
        println!("tools_dir_exists: {}", format_flag(status.tools_dir_exists));
        println!("config_exists: {}", format_flag(status.config_exists));
        if status.backups.is_empty() {
            println!("backups: <none>");
        } else {
            for backup in &status.backups {
                println!("backups.file: {backup}");
            }
        }
        print_tool_statuses(&tools);
        print_warnings(&status.warnings);
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_deps_check(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let tools = check_tools(&paths, &config.tools);

    if runtime.json {
        print_json(&tools)?;
    } else {
        println!("deps check");
        print_tool_statuses(&tools);
    }
    print_diagnostics(runtime, &paths);

    let missing: Vec<&str> = tools
        .iter()
        .filter(|status| !status.runnable)
        .map(|status| status.tool.name())
        .collect();
    if !missing.is_empty() {
        bail!(
            "missing or broken tools: {} (run `vitaport deps install`)",
            missing.join(", ")
        );
    }
    Ok(())
}

fn run_deps_install(runtime: &RuntimeOptions, args: InstallArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let reports = install_missing(&paths, &config.tools, &config.downloads, args.options());

    if runtime.json {
        print_json(&reports)?;
    } else {
        println!("deps install");
        for report in &reports {
            let name = report.tool.name();
            let state = if report.already_present {
                "present"
            } else if report.installed {
                "installed"
            } else {
                "failed"
            };
            println!("{name}.state: {state}");
            if let Some(path) = &report.path {
                println!("{name}.path: {path}");
            }
            if let Some(error) = &report.error {
                println!("{name}.error: {error}");
            }
        }
    }
    print_diagnostics(runtime, &paths);

    let failed = reports.iter().filter(|report| report.error.is_some()).count();
    if failed > 0 {
        bail!("{failed} tool(s) could not be installed");
    }
    Ok(())
}

fn run_unpack_command(runtime: &RuntimeOptions, args: InstallArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let report = run_unpack(&paths, &config, args.options())?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("unpack");
        println!("archives.found: {}", report.archives_found);
        println!("archives.extracted: {}", report.archives_extracted);
        println!("scripts.found: {}", report.scripts_found);
        println!("scripts.decompiled: {}", report.scripts_decompiled);
        println!("archives.deleted: {}", report.archives_deleted);
        println!("scripts.deleted: {}", report.scripts_deleted);
        print_failures(&report.failures);
    }
    print_diagnostics(runtime, &paths);

    if !report.success() {
        bail!("unpack finished with {} failure(s)", report.failures.len());
    }
    Ok(())
}

fn run_cutscenes(runtime: &RuntimeOptions, args: CutscenesArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let mode = if args.scan_only {
        CutsceneMode::ScanOnly
    } else if args.restore {
        CutsceneMode::Restore
    } else {
        CutsceneMode::Comment
    };
    let report = process_cutscenes(
        &paths,
        CutsceneOptions {
            mode,
            dry_run: args.dry_run,
        },
    )?;

    if runtime.json {
        print_json(&report)?;
    } else {
        print_cutscene_report(&report);
    }
    print_diagnostics(runtime, &paths);

    if !report.success() {
        bail!("cutscenes finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn print_cutscene_report(report: &CutsceneReport) {
    println!("cutscenes");
    println!("mode: {:?}", report.mode);
    println!("dry_run: {}", report.dry_run);
    println!("videos.count: {}", report.videos.len());
    for video in &report.videos {
        println!("videos.file: {} ({})", video.path, format_mib(video.bytes));
    }
    println!("references.count: {}", report.references.len());
    for reference in &report.references {
        println!(
            "references.line: {}:{}: {}",
            reference.script,
            reference.line,
            reference.text.trim()
        );
    }
    for script in &report.scripts {
        for change in &script.lines {
            println!("changed: {}:{}", script.script, change.line);
            println!("  - {}", change.before.trim_end());
            println!("  + {}", change.after.trim_end());
        }
    }
    println!("changed_lines: {}", report.changed_lines());
    println!("deleted_videos: {}", report.deleted_videos.len());
    print_failures(&report.errors);
}

fn run_gui(runtime: &RuntimeOptions, args: GuiArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let report = optimize_gui(
        &paths,
        &config.scale,
        RewriteOptions {
            auto_restore: !args.no_restore,
            dry_run: args.dry_run,
        },
    )?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("gui");
        println!("ratio: {}", config.scale.gui_ratio);
        print_rewrite_report("gui", &report.gui);
        print_rewrite_report("screens", &report.screens);
        println!("total_modifications: {}", report.total_modifications());
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_rewrite_report(prefix: &str, report: &FileRewriteReport) {
    println!("{prefix}.path: {}", report.path);
    println!("{prefix}.restored: {}", report.restored);
    println!("{prefix}.backup_created: {}", report.backup_created);
    println!("{prefix}.substitutions: {}", report.substitutions.len());
    for substitution in &report.substitutions {
        println!(
            "{prefix}.line {}: {} {} -> {}",
            substitution.line, substitution.key, substitution.old, substitution.new
        );
    }
    for patch in &report.applied_patches {
        println!("{prefix}.patch.applied: {patch}");
    }
    for patch in &report.skipped_patches {
        println!("{prefix}.patch.skipped: {patch}");
    }
    if let Some(diff) = &report.diff {
        println!("{diff}");
    }
}

fn run_images_command(runtime: &RuntimeOptions, args: ImagesArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let report = run_images(
        &paths,
        &config,
        ImageOptions {
            mode: if args.resize_only {
                ImageMode::ResizeOnly
            } else {
                ImageMode::Optimize
            },
            use_pngquant: !args.no_pngquant,
            install: InstallOptions {
                assume_yes: args.yes,
            },
        },
    )?;

    if runtime.json {
        print_json(&report)?;
    } else {
        print_image_report(&report);
    }
    print_diagnostics(runtime, &paths);

    if !report.success() {
        bail!(
            "images finished with {} error(s) ({:.1}% of {} files)",
            report.errors.len(),
            report.error_rate() * 100.0,
            report.handled()
        );
    }
    Ok(())
}

fn print_image_report(report: &ImageReport) {
    println!("images");
    println!("mode: {:?}", report.mode);
    println!("ratio: {:.4}", report.ratio);
    println!(
        "pngquant: {}",
        report.pngquant.as_deref().unwrap_or("<not used>")
    );
    println!("processed: {}", report.processed);
    println!("skipped: {}", report.skipped);
    println!("errors: {}", report.errors.len());
    println!("saved: {}", format_mib(report.bytes_saved));
    if report.bytes_grown > 0 {
        println!("grown: {}", format_mib(report.bytes_grown));
    }
    print_warnings(
        &report
            .missing_dirs
            .iter()
            .map(|dir| format!("{dir} not found"))
            .collect::<Vec<_>>(),
    );
    print_failures(&report.errors);
}

fn run_audio_command(runtime: &RuntimeOptions, args: InstallArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let report = run_audio(&paths, &config, args.options())?;

    if runtime.json {
        print_json(&report)?;
    } else {
        print_audio_report(&report);
    }
    print_diagnostics(runtime, &paths);

    if !report.success() {
        bail!("audio finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn print_audio_report(report: &AudioReport) {
    println!("audio");
    println!("ffmpeg: {}", report.ffmpeg);
    println!("processed: {}", report.processed);
    println!("converted: {}", report.converted);
    println!("skipped: {}", report.skipped);
    println!("errors: {}", report.errors.len());
    println!("saved: {}", format_mib(report.bytes_saved));
    if report.bytes_grown > 0 {
        println!("grown: {}", format_mib(report.bytes_grown));
    }
    print_failures(&report.errors);
}

fn run_particles(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = optimize_particles(&paths)?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("particles");
        println!("path: {}", report.path);
        println!("changed: {}", report.changed);
        for patch in &report.applied {
            println!("applied: {patch}");
        }
        for patch in &report.skipped {
            println!("already_optimized: {patch}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_sysimg(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let report = generate_system_images(&paths, &config.livearea, &config.scale)?;

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("sysimg");
        for image in &report.generated {
            println!(
                "{}: {} -> {} ({}x{})",
                image.name,
                image.source,
                image.outputs.join(", "),
                image.width,
                image.height
            );
        }
        print_failures(&report.failures);
    }
    print_diagnostics(runtime, &paths);

    if !report.success() {
        bail!("sysimg finished with {} failure(s)", report.failures.len());
    }
    Ok(())
}

fn run_workflow_command(runtime: &RuntimeOptions, args: WorkflowArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let kind = WorkflowKind::from(args.kind);
    let report = run_workflow(
        kind,
        &paths,
        &config,
        InstallOptions {
            assume_yes: args.yes,
        },
    );

    if runtime.json {
        print_json(&report)?;
    } else {
        println!("workflow {}", kind.as_str());
        for stage in &report.stages {
            let state = if stage.success { "ok" } else { "failed" };
            println!("{}: {state} ({})", stage.stage, stage.summary);
        }
        println!("success: {}/{}", report.succeeded, report.total);
        println!("failed: {}/{}", report.failed, report.total);
    }
    print_diagnostics(runtime, &paths);

    if !report.success() {
        bail!("workflow {} stopped after a failed stage", kind.as_str());
    }
    Ok(())
}

fn print_tool_statuses(tools: &[ToolStatus]) {
    for status in tools {
        let name = status.tool.name();
        match (&status.path, status.source) {
            (Some(path), Some(source)) => println!(
                "tools.{name}: {path} ({}, {})",
                source.as_str(),
                if status.runnable { "ok" } else { "not runnable" }
            ),
            _ => println!("tools.{name}: <missing>"),
        }
    }
}

fn print_warnings(warnings: &[String]) {
    if !warnings.is_empty() {
        println!("warnings:");
        for warning in warnings {
            println!("  - {warning}");
        }
    }
}

fn print_failures(failures: &[String]) {
    if !failures.is_empty() {
        println!("failures:");
        for failure in failures {
            println!("  - {failure}");
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, PortConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
