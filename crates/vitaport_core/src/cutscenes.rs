//! Comment out, restore, or list `.webm` cutscene references and delete the videos.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::filesystem::{collect_files, file_size, remove_files};
use crate::runtime::ResolvedPaths;

static MOVIE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\s*)((?:\$|python:\s*)?\s*renpy\.movie_cutscene\s*\(.*\.webm.*\))")
        .expect("movie call pattern")
});
static VIDEO_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\s*)([^#\n]*\.webm)").expect("video code pattern"));
static COMMENTED_VIDEO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\s*)#\s*(.*\.webm.*)").expect("commented video pattern"));

const VIDEO_KEYWORDS: [&str; 3] = ["movie_cutscene", "Video", "Movie"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutsceneMode {
    Comment,
    Restore,
    ScanOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct CutsceneOptions {
    pub mode: CutsceneMode,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoFile {
    pub path: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoReference {
    pub script: String,
    pub line: usize,
    pub text: String,
    pub movie_cutscene: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineChange {
    pub line: usize,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptChange {
    pub script: String,
    pub lines: Vec<LineChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CutsceneReport {
    pub mode: CutsceneMode,
    pub dry_run: bool,
    pub videos: Vec<VideoFile>,
    pub references: Vec<VideoReference>,
    pub scripts: Vec<ScriptChange>,
    pub deleted_videos: Vec<String>,
    pub errors: Vec<String>,
}

impl CutsceneReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn changed_lines(&self) -> usize {
        self.scripts.iter().map(|script| script.lines.len()).sum()
    }
}

fn mentions_video_keyword(line: &str) -> bool {
    VIDEO_KEYWORDS.iter().any(|keyword| line.contains(keyword))
}

fn split_line_ending(line: &str) -> (&str, &str) {
    let body = line.trim_end_matches(['\n', '\r']);
    (body, &line[body.len()..])
}

/// Comment out cutscene calls, keeping indentation: `    $ renpy.movie_cutscene("op.webm")`
/// becomes `    # $ renpy.movie_cutscene("op.webm")`.
pub fn comment_out_videos(content: &str) -> (String, Vec<LineChange>) {
    let mut output = String::with_capacity(content.len() + 64);
    let mut changes = Vec::new();

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let (body, ending) = split_line_ending(line);
        if body.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }
        let indent = if let Some(captures) = MOVIE_CALL.captures(body) {
            captures.get(1).map_or(0, |m| m.end())
        } else if VIDEO_CODE.is_match(body) && mentions_video_keyword(body) {
            body.len() - body.trim_start().len()
        } else {
            output.push_str(line);
            continue;
        };

        let after = format!("{}# {}", &body[..indent], &body[indent..]);
        output.push_str(&after);
        output.push_str(ending);
        changes.push(LineChange {
            line: index + 1,
            before: body.to_string(),
            after,
        });
    }

    (output, changes)
}

/// Undo [`comment_out_videos`].
pub fn restore_videos(content: &str) -> (String, Vec<LineChange>) {
    let mut output = String::with_capacity(content.len());
    let mut changes = Vec::new();

    for (index, line) in content.split_inclusive('\n').enumerate() {
        let (body, ending) = split_line_ending(line);
        let restored = COMMENTED_VIDEO
            .captures(body)
            .filter(|_| mentions_video_keyword(body))
            .and_then(|captures| match (captures.get(1), captures.get(2)) {
                (Some(indent), Some(code)) => Some(format!("{}{}", indent.as_str(), code.as_str())),
                _ => None,
            });
        match restored {
            Some(after) => {
                output.push_str(&after);
                output.push_str(ending);
                changes.push(LineChange {
                    line: index + 1,
                    before: body.to_string(),
                    after,
                });
            }
            None => output.push_str(line),
        }
    }

    (output, changes)
}

/// Lines mentioning any of `video_names`, flagging `movie_cutscene` calls.
pub fn find_references(content: &str, video_names: &[String]) -> Vec<(usize, String, bool)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| video_names.iter().any(|name| line.contains(name.as_str())))
        .map(|(index, line)| {
            (
                index + 1,
                line.trim().to_string(),
                line.contains("movie_cutscene"),
            )
        })
        .collect()
}

pub fn process_cutscenes(
    paths: &ResolvedPaths,
    options: CutsceneOptions,
) -> Result<CutsceneReport> {
    let mut report = CutsceneReport {
        mode: options.mode,
        dry_run: options.dry_run,
        videos: Vec::new(),
        references: Vec::new(),
        scripts: Vec::new(),
        deleted_videos: Vec::new(),
        errors: Vec::new(),
    };
    if !paths.game_dir.is_dir() {
        warn!(
            "{} does not exist; nothing to process",
            paths.relative_display(&paths.game_dir)
        );
        return Ok(report);
    }

    let videos = collect_files(&paths.game_dir, &["webm"])?;
    for video in &videos {
        report.videos.push(VideoFile {
            path: paths.relative_display(video),
            bytes: file_size(video).unwrap_or(0),
        });
    }
    info!("found {} video file(s)", videos.len());

    let scripts = collect_files(&paths.game_dir, &["rpy"])?;
    match options.mode {
        CutsceneMode::ScanOnly => scan_references(paths, &videos, &scripts, &mut report),
        CutsceneMode::Comment | CutsceneMode::Restore => {
            for script in &scripts {
                if let Err(error) = rewrite_script(paths, script, options, &mut report) {
                    let message = format!("{}: {error:#}", paths.relative_display(script));
                    warn!("{message}");
                    report.errors.push(message);
                }
            }
        }
    }

    if options.mode == CutsceneMode::Comment {
        if options.dry_run {
            report.deleted_videos = report.videos.iter().map(|video| video.path.clone()).collect();
        } else {
            let removed = remove_files(&videos);
            report.deleted_videos = removed
                .deleted
                .iter()
                .map(|video| paths.relative_display(video))
                .collect();
            report.errors.extend(removed.failed);
        }
    }

    Ok(report)
}

fn scan_references(
    paths: &ResolvedPaths,
    videos: &[PathBuf],
    scripts: &[PathBuf],
    report: &mut CutsceneReport,
) {
    let names: Vec<String> = videos
        .iter()
        .filter_map(|video| video.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .collect();
    if names.is_empty() {
        return;
    }
    for script in scripts {
        let content = match fs::read_to_string(script) {
            Ok(content) => content,
            Err(error) => {
                warn!("cannot read {}: {error}", script.display());
                continue;
            }
        };
        for (line, text, movie_cutscene) in find_references(&content, &names) {
            report.references.push(VideoReference {
                script: paths.relative_display(script),
                line,
                text,
                movie_cutscene,
            });
        }
    }
}

fn rewrite_script(
    paths: &ResolvedPaths,
    script: &Path,
    options: CutsceneOptions,
    report: &mut CutsceneReport,
) -> Result<()> {
    let content =
        fs::read_to_string(script).with_context(|| format!("failed to read {}", script.display()))?;
    let (rewritten, lines) = match options.mode {
        CutsceneMode::Restore => restore_videos(&content),
        _ => comment_out_videos(&content),
    };
    if lines.is_empty() {
        return Ok(());
    }
    if !options.dry_run {
        fs::write(script, rewritten)
            .with_context(|| format!("failed to write {}", script.display()))?;
    }
    debug!("{}: {} line(s)", script.display(), lines.len());
    report.scripts.push(ScriptChange {
        script: paths.relative_display(script),
        lines,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{
        CutsceneMode, CutsceneOptions, comment_out_videos, find_references, process_cutscenes,
        restore_videos,
    };
    use crate::runtime::ResolvedPaths;

    const SCRIPT: &str = "label start:\n    $ renpy.movie_cutscene(\"op.webm\")\n    # $ renpy.movie_cutscene(\"old.webm\")\n    image intro = Movie(play=\"images/intro.webm\")\n    \"text mentioning op.webm\"\n    scene bg\n";

    #[test]
    fn comment_out_keeps_indentation_and_skips_comments() {
        let (output, changes) = comment_out_videos(SCRIPT);
        assert_eq!(changes.len(), 2);
        assert!(output.contains("    # $ renpy.movie_cutscene(\"op.webm\")\n"));
        assert!(output.contains("    # image intro = Movie(play=\"images/intro.webm\")\n"));
        assert!(output.contains("    # $ renpy.movie_cutscene(\"old.webm\")\n"));
        assert!(output.contains("    \"text mentioning op.webm\"\n"));
    }

    #[test]
    fn python_block_calls_are_commented() {
        let (output, changes) =
            comment_out_videos("    python: renpy.movie_cutscene('a.WEBM')\r\n");
        assert_eq!(changes.len(), 1);
        assert_eq!(output, "    # python: renpy.movie_cutscene('a.WEBM')\r\n");
    }

    #[test]
    fn restore_reverses_comment_out() {
        let (commented, _) = comment_out_videos(SCRIPT);
        let (restored, changes) = restore_videos(&commented);
        assert_eq!(changes.len(), 3);
        assert!(restored.contains("    $ renpy.movie_cutscene(\"op.webm\")\n"));
        assert!(restored.contains("    image intro = Movie(play=\"images/intro.webm\")\n"));
    }

    #[test]
    fn references_flag_movie_calls() {
        let refs = find_references(SCRIPT, &["op.webm".to_string()]);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, 2);
        assert!(refs[0].2);
        assert!(!refs[1].2);
    }

    fn project() -> (tempfile::TempDir, ResolvedPaths) {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        fs::create_dir_all(paths.game_dir.join("movies")).expect("create game");
        fs::write(paths.game_dir.join("script.rpy"), SCRIPT).expect("write script");
        fs::write(paths.game_dir.join("movies/op.webm"), vec![0u8; 2048]).expect("write video");
        (temp, paths)
    }

    #[test]
    fn scan_only_and_dry_run_leave_everything_in_place() {
        let (_temp, paths) = project();
        for mode in [CutsceneMode::ScanOnly, CutsceneMode::Comment] {
            let report = process_cutscenes(
                &paths,
                CutsceneOptions {
                    mode,
                    dry_run: true,
                },
            )
            .expect("process");
            assert!(report.success());
            assert_eq!(report.videos.len(), 1);
            assert_eq!(report.videos[0].bytes, 2048);
        }
        let scan = process_cutscenes(
            &paths,
            CutsceneOptions {
                mode: CutsceneMode::ScanOnly,
                dry_run: false,
            },
        )
        .expect("scan");
        assert_eq!(scan.references.len(), 2);
        assert!(scan.deleted_videos.is_empty());
        assert_eq!(
            fs::read_to_string(paths.game_dir.join("script.rpy")).expect("read"),
            SCRIPT
        );
        assert!(paths.game_dir.join("movies/op.webm").exists());
    }

    #[test]
    fn comment_then_restore_round_trips_scripts_and_deletes_videos_once() {
        let (_temp, paths) = project();
        let report = process_cutscenes(
            &paths,
            CutsceneOptions {
                mode: CutsceneMode::Comment,
                dry_run: false,
            },
        )
        .expect("comment");
        assert!(report.success());
        assert_eq!(report.changed_lines(), 2);
        assert_eq!(report.deleted_videos, vec!["game/movies/op.webm"]);
        assert!(!paths.game_dir.join("movies/op.webm").exists());

        let restored = process_cutscenes(
            &paths,
            CutsceneOptions {
                mode: CutsceneMode::Restore,
                dry_run: false,
            },
        )
        .expect("restore");
        assert!(restored.deleted_videos.is_empty());
        let content = fs::read_to_string(paths.game_dir.join("script.rpy")).expect("read");
        assert!(content.contains("\n    $ renpy.movie_cutscene(\"op.webm\")\n"));
    }
}
