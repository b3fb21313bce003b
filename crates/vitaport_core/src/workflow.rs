//! Fixed stage sequences that stop at the first failing stage.

use std::fmt;

use anyhow::Result;
use serde::Serialize;
use tracing::{error, info};

use crate::bootstrap::InstallOptions;
use crate::config::PortConfig;
use crate::cutscenes::{CutsceneMode, CutsceneOptions, process_cutscenes};
use crate::gui::optimize_gui;
use crate::images::{ImageMode, ImageOptions, run_images};
use crate::rewrite::RewriteOptions;
use crate::runtime::ResolvedPaths;
use crate::unpack::run_unpack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    /// Unpack, strip cutscenes, rescale the GUI config and resize images.
    Lossless,
    /// Unpack and strip cutscenes only.
    TrueLossless,
}

impl WorkflowKind {
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::Lossless => &[Stage::Unpack, Stage::Cutscenes, Stage::Gui, Stage::Images],
            Self::TrueLossless => &[Stage::Unpack, Stage::Cutscenes],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lossless => "lossless",
            Self::TrueLossless => "true-lossless",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Unpack,
    Cutscenes,
    Gui,
    Images,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unpack => "unpack",
            Self::Cutscenes => "cutscenes",
            Self::Gui => "gui",
            Self::Images => "images",
        };
        f.write_str(name)
    }
}

/// What a stage reports back: pass/fail plus a one-line summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub success: bool,
    pub summary: String,
}

impl StageOutcome {
    pub fn new(success: bool, summary: impl Into<String>) -> Self {
        Self {
            success,
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub workflow: WorkflowKind,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub stages: Vec<StageResult>,
}

impl WorkflowReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Run `kind`'s stages through `runner`; an error counts as a failed stage.
pub fn run_stages<F>(kind: WorkflowKind, mut runner: F) -> WorkflowReport
where
    F: FnMut(Stage) -> Result<StageOutcome>,
{
    let stages = kind.stages();
    let mut report = WorkflowReport {
        workflow: kind,
        total: stages.len(),
        succeeded: 0,
        failed: 0,
        stages: Vec::new(),
    };

    for (index, stage) in stages.iter().copied().enumerate() {
        info!("[{}/{}] {stage}", index + 1, stages.len());
        let outcome = runner(stage)
            .unwrap_or_else(|error| StageOutcome::new(false, format!("{error:#}")));
        report.stages.push(StageResult {
            stage,
            success: outcome.success,
            summary: outcome.summary,
        });
        if !outcome.success {
            report.failed += 1;
            error!("{stage} failed, stopping {} workflow", kind.as_str());
            break;
        }
        report.succeeded += 1;
    }
    report
}

pub fn run_workflow(
    kind: WorkflowKind,
    paths: &ResolvedPaths,
    config: &PortConfig,
    install: InstallOptions,
) -> WorkflowReport {
    run_stages(kind, |stage| run_stage(stage, paths, config, install))
}

fn run_stage(
    stage: Stage,
    paths: &ResolvedPaths,
    config: &PortConfig,
    install: InstallOptions,
) -> Result<StageOutcome> {
    match stage {
        Stage::Unpack => {
            let report = run_unpack(paths, config, install)?;
            Ok(StageOutcome::new(
                report.success(),
                format!(
                    "{}/{} archives extracted, {}/{} scripts decompiled",
                    report.archives_extracted,
                    report.archives_found,
                    report.scripts_decompiled,
                    report.scripts_found
                ),
            ))
        }
        Stage::Cutscenes => {
            let report = process_cutscenes(
                paths,
                CutsceneOptions {
                    mode: CutsceneMode::Comment,
                    dry_run: false,
                },
            )?;
            Ok(StageOutcome::new(
                report.success(),
                format!(
                    "{} line(s) commented, {} video(s) deleted",
                    report.changed_lines(),
                    report.deleted_videos.len()
                ),
            ))
        }
        Stage::Gui => {
            let report = optimize_gui(paths, &config.scale, RewriteOptions::default())?;
            Ok(StageOutcome::new(
                true,
                format!("{} modification(s)", report.total_modifications()),
            ))
        }
        Stage::Images => {
            let report = run_images(
                paths,
                config,
                ImageOptions {
                    mode: ImageMode::ResizeOnly,
                    use_pngquant: false,
                    install,
                },
            )?;
            Ok(StageOutcome::new(
                report.success(),
                format!(
                    "{} resized, {} skipped, {} error(s)",
                    report.processed,
                    report.skipped,
                    report.errors.len()
                ),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::{Stage, StageOutcome, WorkflowKind, run_stages};

    #[test]
    fn workflows_list_their_stages_in_order() {
        assert_eq!(
            WorkflowKind::Lossless.stages(),
            &[Stage::Unpack, Stage::Cutscenes, Stage::Gui, Stage::Images]
        );
        assert_eq!(
            WorkflowKind::TrueLossless.stages(),
            &[Stage::Unpack, Stage::Cutscenes]
        );
    }

    #[test]
    fn all_stages_run_when_each_succeeds() {
        let mut seen = Vec::new();
        let report = run_stages(WorkflowKind::Lossless, |stage| {
            seen.push(stage);
            Ok(StageOutcome::new(true, "ok"))
        });
        assert!(report.success());
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.total, 4);
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn first_failure_stops_the_workflow() {
        let mut seen = Vec::new();
        let report = run_stages(WorkflowKind::Lossless, |stage| {
            seen.push(stage);
            Ok(StageOutcome::new(stage != Stage::Cutscenes, "done"))
        });
        assert!(!report.success());
        assert_eq!(seen, vec![Stage::Unpack, Stage::Cutscenes]);
        assert_eq!((report.succeeded, report.failed, report.total), (1, 1, 4));
    }

    #[test]
    fn stage_errors_count_as_failures() {
        let report = run_stages(WorkflowKind::TrueLossless, |stage| {
            if stage == Stage::Unpack {
                bail!("Game directory does not exist: /tmp/none/game");
            }
            Ok(StageOutcome::new(true, "unreachable"))
        });
        assert_eq!(report.stages.len(), 1);
        assert_eq!(report.failed, 1);
        assert!(report.stages[0].summary.contains("Game directory does not exist"));
    }
}
