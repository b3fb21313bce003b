//! Line-oriented numeric literal rewriter.
//!
//! A [`Registry`] lists config keys and how their integer values scale. Every
//! line is tested against the numeric entries in registration order, then the
//! `Borders(...)` entries; the first hit wins and the line is rewritten once.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use similar::TextDiff;
use tracing::{debug, info};

use crate::backup::{PristineState, prepare_pristine, read_pristine};
use crate::error::PortError;
use crate::patch::{Patch, apply_patches};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScaleRule {
    /// `max(1, floor(value * ratio))` with the registry's ratio.
    Ratio,
    /// `max(floor, floor(value * factor))`, used to keep text legible.
    Clamped { floor: i64, factor: f64 },
    /// `floor(value * factor)` with no lower bound.
    Factor { factor: f64 },
}

impl ScaleRule {
    pub fn apply(self, value: i64, ratio: f64) -> i64 {
        match self {
            Self::Ratio => scale_value(value, ratio),
            Self::Clamped { floor, factor } => floor_mul(value, factor).max(floor),
            Self::Factor { factor } => floor_mul(value, factor),
        }
    }
}

pub fn scale_value(value: i64, ratio: f64) -> i64 {
    floor_mul(value, ratio).max(1)
}

fn floor_mul(value: i64, factor: f64) -> i64 {
    (value as f64 * factor).floor() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySyntax {
    /// `key = 123`
    Assignment,
    /// `keyword 123`
    Keyword,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryEntry {
    pub key: String,
    pub syntax: KeySyntax,
    pub rule: ScaleRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolutionRewrite {
    pub from: (u32, u32),
    pub to: (u32, u32),
}

#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    pub ratio: f64,
    pub numeric: Vec<RegistryEntry>,
    pub borders: Vec<String>,
    pub resolution: Option<ResolutionRewrite>,
}

impl Registry {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            numeric: Vec::new(),
            borders: Vec::new(),
            resolution: None,
        }
    }

    pub fn assignment(mut self, key: &str, rule: ScaleRule) -> Self {
        self.numeric.push(RegistryEntry {
            key: key.to_string(),
            syntax: KeySyntax::Assignment,
            rule,
        });
        self
    }

    pub fn keyword(mut self, keyword: &str, rule: ScaleRule) -> Self {
        self.numeric.push(RegistryEntry {
            key: keyword.to_string(),
            syntax: KeySyntax::Keyword,
            rule,
        });
        self
    }

    pub fn borders(mut self, key: &str) -> Self {
        self.borders.push(key.to_string());
        self
    }

    pub fn resolution(mut self, from: (u32, u32), to: (u32, u32)) -> Self {
        self.resolution = Some(ResolutionRewrite { from, to });
        self
    }

    fn compile(&self) -> Result<CompiledRegistry<'_>> {
        let mut numeric = Vec::with_capacity(self.numeric.len());
        for entry in &self.numeric {
            let escaped = regex::escape(&entry.key);
            let pattern = match entry.syntax {
                KeySyntax::Assignment => format!(r"(\b{escaped}\s*=\s*)(\d+)"),
                KeySyntax::Keyword => format!(r"(\b{escaped}\s+)(\d+)"),
            };
            let regex = Regex::new(&pattern)
                .with_context(|| format!("invalid registry key: {}", entry.key))?;
            numeric.push((entry, regex));
        }

        let mut borders = Vec::with_capacity(self.borders.len());
        for key in &self.borders {
            let escaped = regex::escape(key);
            let pattern = format!(
                r"\b{escaped}\s*=\s*Borders\((\d+)(\s*,\s*)(\d+)(\s*,\s*)(\d+)(\s*,\s*)(\d+)\)"
            );
            let regex =
                Regex::new(&pattern).with_context(|| format!("invalid borders key: {key}"))?;
            borders.push((key.as_str(), regex));
        }

        Ok(CompiledRegistry {
            ratio: self.ratio,
            numeric,
            borders,
        })
    }
}

struct CompiledRegistry<'a> {
    ratio: f64,
    numeric: Vec<(&'a RegistryEntry, Regex)>,
    borders: Vec<(&'a str, Regex)>,
}

impl CompiledRegistry<'_> {
    /// The rewritten line and what changed; the caller fills in the line number.
    fn rewrite_line(&self, line: &str) -> Option<(String, Substitution)> {
        for (entry, regex) in &self.numeric {
            let Some(captures) = regex.captures(line) else {
                continue;
            };
            let (Some(prefix), Some(value)) = (captures.get(1), captures.get(2)) else {
                continue;
            };
            let Ok(old_value) = value.as_str().parse::<i64>() else {
                continue;
            };
            let new_value = entry.rule.apply(old_value, self.ratio);
            let mut rewritten = String::with_capacity(line.len());
            rewritten.push_str(&line[..prefix.start()]);
            rewritten.push_str(prefix.as_str());
            rewritten.push_str(&new_value.to_string());
            rewritten.push_str(&line[value.end()..]);
            return Some((
                rewritten,
                Substitution {
                    line: 0,
                    key: entry.key.clone(),
                    old: old_value.to_string(),
                    new: new_value.to_string(),
                },
            ));
        }

        for (key, regex) in &self.borders {
            let Some(captures) = regex.captures(line) else {
                continue;
            };
            let mut old_values = Vec::with_capacity(4);
            let mut new_values = Vec::with_capacity(4);
            let mut rewritten = String::with_capacity(line.len());
            let mut cursor = 0usize;
            for group in [1usize, 3, 5, 7] {
                let Some(digits) = captures.get(group) else {
                    return None;
                };
                let Ok(old_value) = digits.as_str().parse::<i64>() else {
                    return None;
                };
                let new_value = scale_value(old_value, self.ratio);
                rewritten.push_str(&line[cursor..digits.start()]);
                rewritten.push_str(&new_value.to_string());
                cursor = digits.end();
                old_values.push(old_value);
                new_values.push(new_value);
            }
            rewritten.push_str(&line[cursor..]);
            return Some((
                rewritten,
                Substitution {
                    line: 0,
                    key: (*key).to_string(),
                    old: format_borders(&old_values),
                    new: format_borders(&new_values),
                },
            ));
        }

        None
    }
}

fn format_borders(values: &[i64]) -> String {
    let joined = values
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("Borders({joined})")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    /// 1-based line number; 0 for whole-file rewrites.
    pub line: usize,
    pub key: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone)]
pub struct RewriteOutput {
    pub content: String,
    pub substitutions: Vec<Substitution>,
}

pub fn rewrite_text(content: &str, registry: &Registry) -> Result<RewriteOutput> {
    let compiled = registry.compile()?;
    let mut output = String::with_capacity(content.len());
    let mut substitutions = Vec::new();

    for (index, line) in content.split_inclusive('\n').enumerate() {
        match compiled.rewrite_line(line) {
            Some((rewritten, substitution)) => {
                let substitution = Substitution {
                    line: index + 1,
                    ..substitution
                };
                debug!(
                    "line {}: {}: {} -> {}",
                    substitution.line, substitution.key, substitution.old, substitution.new
                );
                output.push_str(&rewritten);
                substitutions.push(substitution);
            }
            None => output.push_str(line),
        }
    }

    if let Some(resolution) = registry.resolution {
        let from = format!("gui.init({}, {})", resolution.from.0, resolution.from.1);
        if output.contains(&from) {
            let to = format!("gui.init({}, {})", resolution.to.0, resolution.to.1);
            output = output.replace(&from, &to);
            substitutions.push(Substitution {
                line: 0,
                key: "gui.init".to_string(),
                old: format!("{}, {}", resolution.from.0, resolution.from.1),
                new: format!("{}, {}", resolution.to.0, resolution.to.1),
            });
        }
    }

    Ok(RewriteOutput {
        content: output,
        substitutions,
    })
}

/// Registry plus literal patches applied after the line pass.
#[derive(Debug, Clone)]
pub struct RewriteProfile {
    pub registry: Registry,
    pub patches: Vec<Patch>,
}

#[derive(Debug, Clone, Copy)]
pub struct RewriteOptions {
    pub auto_restore: bool,
    pub dry_run: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            auto_restore: true,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileRewriteReport {
    pub path: String,
    pub dry_run: bool,
    pub restored: bool,
    pub backup_created: bool,
    pub substitutions: Vec<Substitution>,
    pub applied_patches: Vec<String>,
    pub skipped_patches: Vec<String>,
    pub diff: Option<String>,
}

impl FileRewriteReport {
    pub fn modification_count(&self) -> usize {
        self.substitutions.len() + self.applied_patches.len()
    }
}

/// Rewrite `path` in place from its pristine contents.
///
/// A missing file fails with [`PortError::MissingFile`] before any backup is touched.
pub fn rewrite_file(
    path: &Path,
    profile: &RewriteProfile,
    options: RewriteOptions,
) -> Result<FileRewriteReport> {
    if !path.is_file() {
        return Err(PortError::MissingFile {
            path: path.to_path_buf(),
        }
        .into());
    }

    let current =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let (pristine_state, pristine) = if options.dry_run {
        (
            PristineState::default(),
            read_pristine(path, options.auto_restore)?,
        )
    } else {
        let state = prepare_pristine(path, options.auto_restore)?;
        let pristine = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        (state, pristine)
    };

    let rewritten = rewrite_text(&pristine, &profile.registry)?;
    let patched = apply_patches(&rewritten.content, &profile.patches);

    let diff = if options.dry_run {
        let diff = TextDiff::from_lines(&current, &patched.content)
            .unified_diff()
            .context_radius(1)
            .header(
                &format!("{} (current)", path.display()),
                &format!("{} (rewritten)", path.display()),
            )
            .to_string();
        Some(diff)
    } else {
        fs::write(path, &patched.content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        None
    };

    info!(
        "{}: {} substitution(s), {} patch(es){}",
        path.display(),
        rewritten.substitutions.len(),
        patched.applied.len(),
        if options.dry_run { " (dry run)" } else { "" }
    );

    Ok(FileRewriteReport {
        path: path.to_string_lossy().replace('\\', "/"),
        dry_run: options.dry_run,
        restored: pristine_state.restored,
        backup_created: pristine_state.backup_created,
        substitutions: rewritten.substitutions,
        applied_patches: patched.applied,
        skipped_patches: patched.skipped,
        diff,
    })
}
