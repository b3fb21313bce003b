//! Launcher artwork under `scripts_for_vita/sce_sys/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader, RgbaImage};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{LiveareaSection, ScaleSection};
use crate::runtime::ResolvedPaths;

pub const SCE_SYS_DIRNAME: &str = "sce_sys";
pub const ICON_SIZE: (u32, u32) = (128, 128);
pub const STARTUP_SIZE: (u32, u32) = (280, 158);
pub const BACKGROUND_SIZE: (u32, u32) = (960, 544);
/// Fraction of the startup source kept around its centre.
const STARTUP_KEEP: f64 = 0.85;
/// Bottom-right region of a 1280x720 menu: x, y, width, height.
const BACKGROUND_CROP: (u32, u32, u32, u32) = (280, 153, 1000, 567);

/// x, y, width, height.
pub type CropBox = (u32, u32, u32, u32);

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedImage {
    pub name: &'static str,
    pub source: String,
    pub outputs: Vec<String>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SysImageReport {
    pub generated: Vec<GeneratedImage>,
    pub failures: Vec<String>,
}

impl SysImageReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Bounding box of every pixel that is not fully transparent.
pub fn alpha_bounds(image: &RgbaImage) -> Option<CropBox> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel.0[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((left, top, right, bottom)) => {
                (left.min(x), top.min(y), right.max(x), bottom.max(y))
            }
        });
    }
    bounds.map(|(left, top, right, bottom)| (left, top, right - left + 1, bottom - top + 1))
}

/// Centred box keeping `keep` of each dimension.
pub fn center_crop(width: u32, height: u32, keep: f64) -> CropBox {
    let margin = (1.0 - keep) / 2.0;
    let span = |dim: u32| {
        let start = (f64::from(dim) * margin).round() as u32;
        let end = (f64::from(dim) * (1.0 - margin)).round() as u32;
        (start, end.saturating_sub(start).max(1))
    };
    let (x, w) = span(width);
    let (y, h) = span(height);
    (x, y, w, h)
}

/// The menu crop, scaled from the source design resolution to the actual image size.
pub fn background_crop(width: u32, height: u32, scale: &ScaleSection) -> CropBox {
    let sx = f64::from(width) / f64::from(scale.source_width.max(1));
    let sy = f64::from(height) / f64::from(scale.source_height.max(1));
    let (x, y, w, h) = BACKGROUND_CROP;
    let x = (f64::from(x) * sx).round() as u32;
    let y = (f64::from(y) * sy).round() as u32;
    let w = ((f64::from(w) * sx).round() as u32).min(width.saturating_sub(x)).max(1);
    let h = ((f64::from(h) * sy).round() as u32).min(height.saturating_sub(y)).max(1);
    (x, y, w, h)
}

pub fn generate_system_images(
    paths: &ResolvedPaths,
    livearea: &LiveareaSection,
    scale: &ScaleSection,
) -> Result<SysImageReport> {
    let sce_sys = paths.scripts_dir.join(SCE_SYS_DIRNAME);
    let contents = sce_sys.join("livearea").join("contents");
    let mut report = SysImageReport::default();

    let jobs: [(&'static str, PathBuf, Vec<PathBuf>, Job); 3] = [
        (
            "icon0",
            paths.project_root.join(&livearea.icon_source),
            vec![sce_sys.join("icon0.png")],
            Job::Icon,
        ),
        (
            "startup",
            paths.project_root.join(&livearea.startup_source),
            vec![contents.join("startup.png")],
            Job::Startup,
        ),
        (
            "background",
            paths.project_root.join(&livearea.background_source),
            vec![contents.join("bg.png"), sce_sys.join("pic0.png")],
            Job::Background,
        ),
    ];

    for (name, source, outputs, job) in jobs {
        match render(&source, &outputs, job, scale) {
            Ok((width, height)) => {
                info!("generated {name} ({width}x{height})");
                report.generated.push(GeneratedImage {
                    name,
                    source: paths.relative_display(&source),
                    outputs: outputs
                        .iter()
                        .map(|output| paths.relative_display(output))
                        .collect(),
                    width,
                    height,
                });
            }
            Err(error) => {
                let message = format!("{name}: {error:#}");
                warn!("{message}");
                report.failures.push(message);
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Icon,
    Startup,
    Background,
}

fn render(
    source: &Path,
    outputs: &[PathBuf],
    job: Job,
    scale: &ScaleSection,
) -> Result<(u32, u32)> {
    let image = ImageReader::open(source)
        .with_context(|| format!("failed to open {}", source.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", source.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", source.display()))?;

    let (cropped, (width, height)) = match job {
        Job::Icon => {
            let rgba = image.to_rgba8();
            let cropped = match alpha_bounds(&rgba) {
                Some((x, y, w, h)) => DynamicImage::ImageRgba8(rgba).crop_imm(x, y, w, h),
                None => DynamicImage::ImageRgba8(rgba),
            };
            (cropped, ICON_SIZE)
        }
        Job::Startup => {
            let (x, y, w, h) = center_crop(image.width(), image.height(), STARTUP_KEEP);
            (image.crop_imm(x, y, w, h), STARTUP_SIZE)
        }
        Job::Background => {
            let (x, y, w, h) = background_crop(image.width(), image.height(), scale);
            (image.crop_imm(x, y, w, h), BACKGROUND_SIZE)
        }
    };
    let resized = cropped.resize_exact(width, height, FilterType::Lanczos3);

    for output in outputs {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        resized
            .save_with_format(output, ImageFormat::Png)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }
    Ok((width, height))
}
