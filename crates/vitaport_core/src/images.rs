//! Scale game images to the handheld's resolution and recompress them.

use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use color_quant::NeuQuant;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::bootstrap::{InstallOptions, ensure_tool};
use crate::config::{ImageSection, PortConfig};
use crate::filesystem::{collect_files, file_size, format_mib};
use crate::runtime::ResolvedPaths;
use crate::tools::{Tool, ToolKind};

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];
const PNGQUANT_TIMEOUT: Duration = Duration::from_secs(120);
/// A resized file at least this fraction of the original gets the conservative encoder.
const RETRY_THRESHOLD: f64 = 0.99;
/// NeuQuant sampling factor: 1 is slowest and best, 30 fastest.
const QUANTIZER_SAMPLE_FACTOR: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageMode {
    /// Resize and recompress.
    Optimize,
    /// Resize only, keeping each file's format at high quality.
    ResizeOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageOptions {
    pub mode: ImageMode,
    /// Look up (and offer to install) pngquant; without it PNGs are quantised in-process.
    pub use_pngquant: bool,
    pub install: InstallOptions,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            mode: ImageMode::Optimize,
            use_pngquant: true,
            install: InstallOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoChangeNeeded,
    PoorCompression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageOutcome {
    Resized {
        from: (u32, u32),
        to: (u32, u32),
        old_bytes: u64,
        new_bytes: u64,
        encoder: String,
    },
    Recompressed {
        old_bytes: u64,
        new_bytes: u64,
        encoder: String,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub mode: ImageMode,
    pub ratio: f64,
    pub pngquant: Option<String>,
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub missing_dirs: Vec<String>,
    pub bytes_saved: u64,
    pub bytes_grown: u64,
    pub max_error_rate: f64,
}

impl ImageReport {
    fn new(mode: ImageMode, ratio: f64, max_error_rate: f64) -> Self {
        Self {
            mode,
            ratio,
            pngquant: None,
            processed: 0,
            skipped: 0,
            errors: Vec::new(),
            missing_dirs: Vec::new(),
            bytes_saved: 0,
            bytes_grown: 0,
            max_error_rate,
        }
    }

    pub fn handled(&self) -> usize {
        self.processed + self.skipped + self.errors.len()
    }

    pub fn error_rate(&self) -> f64 {
        match self.handled() {
            0 => 0.0,
            handled => self.errors.len() as f64 / handled as f64,
        }
    }

    /// Optimizing tolerates occasional corrupt files; resize-only does not.
    pub fn success(&self) -> bool {
        match self.mode {
            ImageMode::Optimize => self.error_rate() < self.max_error_rate,
            ImageMode::ResizeOnly => self.errors.is_empty(),
        }
    }

    fn record(&mut self, outcome: &ImageOutcome) {
        match outcome {
            ImageOutcome::Resized {
                old_bytes,
                new_bytes,
                ..
            }
            | ImageOutcome::Recompressed {
                old_bytes,
                new_bytes,
                ..
            } => {
                self.processed += 1;
                if new_bytes <= old_bytes {
                    self.bytes_saved += old_bytes - new_bytes;
                } else {
                    self.bytes_grown += new_bytes - old_bytes;
                }
            }
            ImageOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// `floor(dim * ratio)`, never below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, ratio: f64) -> (u32, u32) {
    let scale = |dim: u32| ((f64::from(dim) * ratio).floor() as u32).max(1);
    (scale(width), scale(height))
}

pub fn has_transparency(image: &DynamicImage) -> bool {
    image.color().has_alpha() && image.to_rgba8().pixels().any(|pixel| pixel.0[3] < u8::MAX)
}

/// Palette size for a PNG: transparent images keep more colours than small opaque ones.
pub fn palette_colors(transparent: bool, original_bytes: u64, settings: &ImageSection) -> u16 {
    if transparent {
        64
    } else if original_bytes > settings.palette_threshold_bytes {
        128
    } else {
        32
    }
}

/// Resolve pngquant when asked to, then process `game/images` and `game/gui`.
pub fn run_images(
    paths: &ResolvedPaths,
    config: &PortConfig,
    options: ImageOptions,
) -> Result<ImageReport> {
    let pngquant = if options.mode == ImageMode::Optimize && options.use_pngquant {
        match ensure_tool(
            ToolKind::Pngquant,
            paths,
            &config.tools,
            &config.downloads,
            options.install,
        ) {
            Ok(tool) => Some(tool),
            Err(error) => {
                warn!("continuing with the built-in quantiser: {error:#}");
                None
            }
        }
    } else {
        None
    };
    process_images(
        paths,
        &config.images,
        config.scale.image_ratio(),
        options.mode,
        pngquant.as_ref(),
    )
}

pub fn process_images(
    paths: &ResolvedPaths,
    settings: &ImageSection,
    ratio: f64,
    mode: ImageMode,
    pngquant: Option<&Tool>,
) -> Result<ImageReport> {
    let mut report = ImageReport::new(mode, ratio, settings.max_error_rate);
    report.pngquant = pngquant.map(Tool::display);
    let optimizer = Optimizer {
        settings,
        ratio,
        mode,
        pngquant,
    };
    info!("scaling images by {ratio:.4} ({mode:?})");

    for dir in [&paths.images_dir, &paths.gui_dir] {
        if !dir.is_dir() {
            let relative = paths.relative_display(dir);
            warn!("image directory not found: {relative}");
            report.missing_dirs.push(relative);
            continue;
        }
        for file in collect_files(dir, IMAGE_EXTENSIONS)? {
            let relative = paths.relative_display(&file);
            match optimizer.process(&file) {
                Ok(outcome) => {
                    log_outcome(&relative, &outcome);
                    report.record(&outcome);
                }
                Err(error) => {
                    let message = format!("{relative}: {error:#}");
                    warn!("error processing {message}");
                    report.errors.push(message);
                }
            }
        }
    }
    Ok(report)
}

fn log_outcome(relative: &str, outcome: &ImageOutcome) {
    match outcome {
        ImageOutcome::Resized {
            from,
            to,
            old_bytes,
            new_bytes,
            encoder,
        } => debug!(
            "resized {relative} ({}x{} -> {}x{}, {} -> {}) [{encoder}]",
            from.0,
            from.1,
            to.0,
            to.1,
            format_mib(*old_bytes),
            format_mib(*new_bytes)
        ),
        ImageOutcome::Recompressed {
            old_bytes,
            new_bytes,
            encoder,
        } => debug!(
            "compressed {relative} ({} -> {}) [{encoder}]",
            format_mib(*old_bytes),
            format_mib(*new_bytes)
        ),
        ImageOutcome::Skipped { reason } => debug!("skipped {relative} ({reason:?})"),
    }
}

struct Optimizer<'a> {
    settings: &'a ImageSection,
    ratio: f64,
    mode: ImageMode,
    pngquant: Option<&'a Tool>,
}

impl Optimizer<'_> {
    fn process(&self, path: &Path) -> Result<ImageOutcome> {
        let old_bytes = file_size(path)?;
        let (image, format) = open_image(path)?;
        let from = (image.width(), image.height());
        let to = scaled_dimensions(from.0, from.1, self.ratio);

        if to == from {
            if self.mode == ImageMode::ResizeOnly || old_bytes <= self.settings.recompress_min_bytes
            {
                return Ok(ImageOutcome::Skipped {
                    reason: SkipReason::NoChangeNeeded,
                });
            }
            return self.recompress(path, &image, format, old_bytes);
        }

        let resized = image.resize_exact(to.0, to.1, FilterType::Lanczos3);
        let temp = sibling_temp(path)?;
        let encoder = match self.mode {
            ImageMode::ResizeOnly => encode_plain(
                &resized,
                format,
                self.settings.jpeg_resize_only_quality,
                temp.path(),
            )?,
            ImageMode::Optimize => {
                let mut encoder =
                    self.encode_compressed(&resized, format, old_bytes, temp.path())?;
                let first = file_size(temp.path())?;
                if first as f64 >= old_bytes as f64 * RETRY_THRESHOLD {
                    if let Some(retry) = self.encode_conservative(&resized, format, temp.path())? {
                        encoder = retry;
                    }
                }
                encoder
            }
        };
        let new_bytes = file_size(temp.path())?;
        replace_with(temp, path)?;
        Ok(ImageOutcome::Resized {
            from,
            to,
            old_bytes,
            new_bytes,
            encoder,
        })
    }

    fn recompress(
        &self,
        path: &Path,
        image: &DynamicImage,
        format: ImageFormat,
        old_bytes: u64,
    ) -> Result<ImageOutcome> {
        let temp = sibling_temp(path)?;
        let encoder = self.encode_compressed(image, format, old_bytes, temp.path())?;
        let new_bytes = file_size(temp.path())?;
        if new_bytes + self.settings.min_saving_bytes >= old_bytes {
            return Ok(ImageOutcome::Skipped {
                reason: SkipReason::PoorCompression,
            });
        }
        replace_with(temp, path)?;
        Ok(ImageOutcome::Recompressed {
            old_bytes,
            new_bytes,
            encoder,
        })
    }

    fn encode_compressed(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        old_bytes: u64,
        dest: &Path,
    ) -> Result<String> {
        match format {
            ImageFormat::Png => self.encode_palette_png(image, old_bytes, dest),
            ImageFormat::Jpeg => {
                write_jpeg(image, self.settings.jpeg_quality, dest)?;
                Ok(format!("jpeg quality {}", self.settings.jpeg_quality))
            }
            other => {
                write_format(image, other, dest)?;
                Ok("standard".to_string())
            }
        }
    }

    /// `None` when the format has no gentler encoder to fall back to.
    fn encode_conservative(
        &self,
        image: &DynamicImage,
        format: ImageFormat,
        dest: &Path,
    ) -> Result<Option<String>> {
        match format {
            ImageFormat::Png => {
                write_png(image, dest)?;
                Ok(Some("lossless best".to_string()))
            }
            ImageFormat::Jpeg => {
                write_jpeg(image, self.settings.jpeg_fallback_quality, dest)?;
                Ok(Some(format!(
                    "jpeg quality {}",
                    self.settings.jpeg_fallback_quality
                )))
            }
            _ => Ok(None),
        }
    }

    fn encode_palette_png(
        &self,
        image: &DynamicImage,
        old_bytes: u64,
        dest: &Path,
    ) -> Result<String> {
        let transparent = has_transparency(image);
        let colors = palette_colors(transparent, old_bytes, self.settings);
        let source = if transparent {
            DynamicImage::ImageRgba8(image.to_rgba8())
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };

        if let Some(pngquant) = self.pngquant {
            let quality = &self.settings.pngquant_quality;
            match quantize(pngquant, &source, colors, quality, dest) {
                Ok(()) => return Ok(format!("palette {colors} colors (pngquant)")),
                Err(error) => debug!("pngquant fell through: {error:#}"),
            }
        }
        write_indexed_png(&source, colors, transparent, dest)?;
        Ok(format!("palette {colors} colors (neuquant)"))
    }
}

fn open_image(path: &Path) -> Result<(DynamicImage, ImageFormat)> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {}", path.display()))?;
    let Some(format) = reader.format() else {
        bail!("unrecognised image format: {}", path.display());
    };
    let image = reader
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    Ok((image, format))
}

/// Temp file in the target's directory with the same extension; dropped (and removed) on error.
fn sibling_temp(path: &Path) -> Result<NamedTempFile> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix(".vitaport-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))
}

fn replace_with(temp: NamedTempFile, target: &Path) -> Result<()> {
    temp.persist(target)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to replace {}", target.display()))?;
    Ok(())
}

fn encode_plain(
    image: &DynamicImage,
    format: ImageFormat,
    jpeg_quality: u8,
    dest: &Path,
) -> Result<String> {
    match format {
        ImageFormat::Jpeg => {
            write_jpeg(image, jpeg_quality, dest)?;
            Ok(format!("jpeg quality {jpeg_quality}"))
        }
        other => {
            write_format(image, other, dest)?;
            Ok("standard".to_string())
        }
    }
}

fn write_png(image: &DynamicImage, dest: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    image
        .write_with_encoder(PngEncoder::new_with_quality(
            &mut buffer,
            CompressionType::Best,
            PngFilter::Adaptive,
        ))
        .with_context(|| format!("failed to encode {}", dest.display()))?;
    write_bytes(dest, &buffer)
}

/// NeuQuant palette with Floyd-Steinberg dithering, written as an 8-bit indexed PNG.
fn write_indexed_png(
    image: &DynamicImage,
    colors: u16,
    transparent: bool,
    dest: &Path,
) -> Result<()> {
    let mut rgba = image.to_rgba8();
    let quantizer = NeuQuant::new(QUANTIZER_SAMPLE_FACTOR, usize::from(colors), rgba.as_raw());
    // Error diffusion reaches the next column and row.
    if rgba.width() > 1 && rgba.height() > 1 {
        imageops::dither(&mut rgba, &quantizer);
    }
    let indices = imageops::index_colors(&rgba, &quantizer);
    let map = quantizer.color_map_rgba();
    let palette: Vec<u8> = map
        .chunks_exact(4)
        .flat_map(|entry| [entry[0], entry[1], entry[2]])
        .collect();

    let mut buffer = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut buffer, rgba.width(), rgba.height());
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::High);
        encoder.set_palette(palette);
        if transparent {
            encoder.set_trns(map.chunks_exact(4).map(|entry| entry[3]).collect::<Vec<u8>>());
        }
        let mut writer = encoder
            .write_header()
            .with_context(|| format!("failed to encode {}", dest.display()))?;
        writer
            .write_image_data(indices.as_raw())
            .with_context(|| format!("failed to encode {}", dest.display()))?;
        writer
            .finish()
            .with_context(|| format!("failed to encode {}", dest.display()))?;
    }
    write_bytes(dest, &buffer)
}

fn write_jpeg(image: &DynamicImage, quality: u8, dest: &Path) -> Result<()> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        .with_context(|| format!("failed to encode {}", dest.display()))?;
    write_bytes(dest, &buffer)
}

fn write_format(image: &DynamicImage, format: ImageFormat, dest: &Path) -> Result<()> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format)
        .with_context(|| format!("failed to encode {}", dest.display()))?;
    write_bytes(dest, buffer.get_ref())
}

fn write_bytes(dest: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(dest, bytes).with_context(|| format!("failed to write {}", dest.display()))
}

fn quantize(
    pngquant: &Tool,
    image: &DynamicImage,
    colors: u16,
    quality: &str,
    dest: &Path,
) -> Result<()> {
    let input = sibling_temp(&dest.with_extension("png"))?;
    write_png(image, input.path())?;
    let args: Vec<OsString> = vec![
        colors.to_string().into(),
        format!("--quality={quality}").into(),
        "--speed".into(),
        "1".into(),
        "--strip".into(),
        "--force".into(),
        "-o".into(),
        dest.as_os_str().to_owned(),
        input.path().as_os_str().to_owned(),
    ];
    pngquant.run_checked(args, Some(PNGQUANT_TIMEOUT))?;
    if file_size(dest)? == 0 {
        bail!("pngquant produced no output for {}", dest.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;

    use image::{DynamicImage, ImageFormat, ImageReader, Rgb, RgbImage, Rgba, RgbaImage};
    use tempfile::tempdir;

    use super::{
        ImageMode, ImageOutcome, ImageReport, Optimizer, SkipReason, has_transparency,
        palette_colors, process_images, scaled_dimensions, write_jpeg,
    };
    use crate::config::ImageSection;
    use crate::runtime::ResolvedPaths;

    const RATIO: f64 = 544.0 / 720.0;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 3) as u8, (y * 5) as u8, ((x + y) * 7) as u8])
        }))
    }

    /// Deterministic xorshift noise; compresses badly in every format.
    fn noise(width: u32, height: u32) -> RgbaImage {
        let mut state = 0x2545_f491_u32;
        RgbaImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            Rgba(state.to_le_bytes())
        })
    }

    fn opaque_noise(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(noise(width, height)).to_rgb8())
    }

    fn distinct_colors(path: &Path) -> usize {
        let image = ImageReader::open(path)
            .expect("open")
            .with_guessed_format()
            .expect("guess")
            .decode()
            .expect("decode");
        image
            .to_rgba8()
            .pixels()
            .map(|pixel| pixel.0)
            .collect::<HashSet<_>>()
            .len()
    }

    /// IHDR colour type byte; 3 is an indexed (palette) PNG.
    fn png_color_type(path: &Path) -> u8 {
        fs::read(path).expect("read")[25]
    }

    fn optimize(settings: &ImageSection, ratio: f64, path: &Path) -> ImageOutcome {
        let optimizer = Optimizer {
            settings,
            ratio,
            mode: ImageMode::Optimize,
            pngquant: None,
        };
        optimizer.process(path).expect("process")
    }

    fn save(image: &DynamicImage, path: &Path, format: ImageFormat) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        image.save_with_format(path, format).expect("save image");
    }

    fn dimensions(path: &Path) -> (u32, u32) {
        let image = ImageReader::open(path)
            .expect("open")
            .with_guessed_format()
            .expect("guess")
            .decode()
            .expect("decode");
        (image.width(), image.height())
    }

    fn project() -> (tempfile::TempDir, ResolvedPaths) {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::for_root(temp.path());
        (temp, paths)
    }

    #[test]
    fn scaled_dimensions_floor_and_clamp() {
        assert_eq!(scaled_dimensions(1280, 720, RATIO), (967, 544));
        assert_eq!(scaled_dimensions(100, 40, RATIO), (75, 30));
        assert_eq!(scaled_dimensions(1, 1, RATIO), (1, 1));
    }

    #[test]
    fn transparency_needs_a_translucent_pixel() {
        let opaque = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        assert!(!has_transparency(&opaque));
        let mut pixels = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]));
        pixels.put_pixel(2, 2, Rgba([1, 2, 3, 128]));
        assert!(has_transparency(&DynamicImage::ImageRgba8(pixels)));
        assert!(!has_transparency(&gradient(4, 4)));
    }

    #[test]
    fn palette_size_follows_transparency_and_size() {
        let settings = ImageSection::default();
        let large = settings.palette_threshold_bytes + 1;
        assert_eq!(palette_colors(true, 10, &settings), 64);
        assert_eq!(palette_colors(true, large, &settings), 64);
        assert_eq!(palette_colors(false, large, &settings), 128);
        assert_eq!(palette_colors(false, 10, &settings), 32);
    }

    #[test]
    fn resize_only_scales_and_keeps_format() {
        let (_temp, paths) = project();
        let png = paths.images_dir.join("bg/room.png");
        let jpg = paths.gui_dir.join("frame.jpg");
        save(&gradient(72, 36), &png, ImageFormat::Png);
        save(&gradient(100, 40), &jpg, ImageFormat::Jpeg);

        let report = process_images(
            &paths,
            &ImageSection::default(),
            RATIO,
            ImageMode::ResizeOnly,
            None,
        )
        .expect("process");
        assert!(report.success(), "{:?}", report.errors);
        assert_eq!(report.processed, 2);
        assert_eq!(dimensions(&png), (54, 27));
        assert_eq!(dimensions(&jpg), (75, 30));
        assert_eq!(
            ImageFormat::from_path(&jpg).expect("format"),
            ImageFormat::Jpeg
        );
    }

    #[test]
    fn optimize_resizes_and_leaves_no_temp_files() {
        let (_temp, paths) = project();
        let png = paths.images_dir.join("sprite.png");
        let mut sprite = RgbaImage::from_pixel(40, 40, Rgba([200, 10, 10, 255]));
        sprite.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        save(&DynamicImage::ImageRgba8(sprite), &png, ImageFormat::Png);

        let report = process_images(
            &paths,
            &ImageSection::default(),
            RATIO,
            ImageMode::Optimize,
            None,
        )
        .expect("process");
        assert!(report.success(), "{:?}", report.errors);
        assert_eq!(report.processed, 1);
        assert_eq!(dimensions(&png), (30, 30));
        let leftovers: Vec<_> = fs::read_dir(&paths.images_dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("sprite.png")]);
    }

    #[test]
    fn unchanged_small_images_are_skipped() {
        let (_temp, paths) = project();
        let dot = paths.gui_dir.join("dot.png");
        save(&gradient(1, 1), &dot, ImageFormat::Png);
        let before = fs::read(&dot).expect("read");

        let report = process_images(
            &paths,
            &ImageSection::default(),
            RATIO,
            ImageMode::Optimize,
            None,
        )
        .expect("process");
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 0);
        assert_eq!(fs::read(&dot).expect("read"), before);
    }

    #[test]
    fn corrupt_files_count_as_errors_and_missing_dirs_warn() {
        let (_temp, paths) = project();
        fs::create_dir_all(&paths.images_dir).expect("mkdir");
        fs::write(paths.images_dir.join("broken.png"), "not a png").expect("write");

        let report = process_images(
            &paths,
            &ImageSection::default(),
            RATIO,
            ImageMode::Optimize,
            None,
        )
        .expect("process");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("broken.png"));
        assert_eq!(report.missing_dirs, vec!["game/gui".to_string()]);
        assert!(!report.success());
    }

    #[test]
    fn error_rate_tolerates_under_ten_percent() {
        let mut report = ImageReport::new(ImageMode::Optimize, RATIO, 0.10);
        report.processed = 19;
        report.errors.push("one.png: bad".to_string());
        assert!(report.success());
        report.errors.push("two.png: bad".to_string());
        assert!((report.error_rate() - 2.0 / 21.0).abs() < 1e-9);
        assert!(report.success());
        report.processed = 10;
        assert!(!report.success());

        report.mode = ImageMode::ResizeOnly;
        report.errors.clear();
        assert!(report.success());
        report.record(&ImageOutcome::Skipped {
            reason: SkipReason::PoorCompression,
        });
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn byte_totals_split_savings_and_growth() {
        let mut report = ImageReport::new(ImageMode::Optimize, RATIO, 0.10);
        report.record(&ImageOutcome::Recompressed {
            old_bytes: 1000,
            new_bytes: 400,
            encoder: "jpeg quality 60".to_string(),
        });
        report.record(&ImageOutcome::Resized {
            from: (10, 10),
            to: (7, 7),
            old_bytes: 100,
            new_bytes: 130,
            encoder: "standard".to_string(),
        });
        assert_eq!(report.processed, 2);
        assert_eq!(report.bytes_saved, 600);
        assert_eq!(report.bytes_grown, 30);
    }

    #[test]
    fn opaque_png_without_pngquant_becomes_a_dithered_palette() {
        let (_temp, paths) = project();
        let png = paths.images_dir.join("cg/noise.png");
        save(&opaque_noise(200, 160), &png, ImageFormat::Png);
        let settings = ImageSection::default();
        let old_bytes = fs::metadata(&png).expect("metadata").len();
        let colors = palette_colors(false, old_bytes, &settings);

        let outcome = optimize(&settings, RATIO, &png);
        let ImageOutcome::Resized {
            to,
            new_bytes,
            encoder,
            ..
        } = outcome
        else {
            panic!("expected a resize, got {outcome:?}");
        };
        assert_eq!(to, (151, 120));
        assert_eq!(encoder, format!("palette {colors} colors (neuquant)"));
        assert!(new_bytes < old_bytes / 2, "{new_bytes} vs {old_bytes}");
        assert_eq!(png_color_type(&png), 3);
        assert!(distinct_colors(&png) <= usize::from(colors));
    }

    #[test]
    fn transparent_png_keeps_alpha_in_the_palette() {
        let (_temp, paths) = project();
        let png = paths.gui_dir.join("overlay.png");
        save(&DynamicImage::ImageRgba8(noise(64, 64)), &png, ImageFormat::Png);

        let outcome = optimize(&ImageSection::default(), RATIO, &png);
        let ImageOutcome::Resized { encoder, .. } = &outcome else {
            panic!("expected a resize, got {outcome:?}");
        };
        assert_eq!(encoder, "palette 64 colors (neuquant)");
        assert_eq!(png_color_type(&png), 3);
        let reopened = ImageReader::open(&png)
            .expect("open")
            .decode()
            .expect("decode");
        assert!(reopened.color().has_alpha());
        assert!(has_transparency(&reopened));
        assert!(distinct_colors(&png) <= 64);
    }

    #[test]
    fn single_pixel_rows_quantise_without_dithering() {
        let (_temp, paths) = project();
        let png = paths.gui_dir.join("bar.png");
        save(&opaque_noise(40, 1), &png, ImageFormat::Png);

        let outcome = optimize(&ImageSection::default(), RATIO, &png);
        assert!(
            matches!(outcome, ImageOutcome::Resized { to: (30, 1), .. }),
            "{outcome:?}"
        );
    }

    #[test]
    fn unchanged_large_file_is_replaced_when_recompression_saves_enough() {
        let (_temp, paths) = project();
        let jpg = paths.images_dir.join("bg/street.jpg");
        fs::create_dir_all(jpg.parent().expect("parent")).expect("mkdir");
        write_jpeg(&opaque_noise(160, 120), 100, &jpg).expect("write jpeg");
        let old_bytes = fs::metadata(&jpg).expect("metadata").len();
        let settings = ImageSection {
            recompress_min_bytes: 1024,
            ..ImageSection::default()
        };
        assert!(old_bytes > settings.recompress_min_bytes);

        let outcome = optimize(&settings, 1.0, &jpg);
        let ImageOutcome::Recompressed {
            new_bytes, encoder, ..
        } = outcome
        else {
            panic!("expected recompression, got {outcome:?}");
        };
        assert_eq!(encoder, format!("jpeg quality {}", settings.jpeg_quality));
        assert!(new_bytes + settings.min_saving_bytes < old_bytes);
        assert_eq!(fs::metadata(&jpg).expect("metadata").len(), new_bytes);
        assert_eq!(dimensions(&jpg), (160, 120));
    }

    #[test]
    fn unchanged_large_file_is_kept_when_savings_are_too_small() {
        let (_temp, paths) = project();
        let jpg = paths.images_dir.join("bg/street.jpg");
        fs::create_dir_all(jpg.parent().expect("parent")).expect("mkdir");
        write_jpeg(&opaque_noise(160, 120), 100, &jpg).expect("write jpeg");
        let before = fs::read(&jpg).expect("read");
        let settings = ImageSection {
            recompress_min_bytes: 1024,
            min_saving_bytes: 1 << 40,
            ..ImageSection::default()
        };

        let outcome = optimize(&settings, 1.0, &jpg);
        assert_eq!(
            outcome,
            ImageOutcome::Skipped {
                reason: SkipReason::PoorCompression
            }
        );
        assert_eq!(fs::read(&jpg).expect("read"), before);
        let entries = fs::read_dir(jpg.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn resize_that_barely_shrinks_retries_with_the_conservative_encoder() {
        let (_temp, paths) = project();
        let jpg = paths.images_dir.join("cg/grain.jpg");
        fs::create_dir_all(jpg.parent().expect("parent")).expect("mkdir");
        write_jpeg(&opaque_noise(160, 120), 10, &jpg).expect("write jpeg");
        // Quality 100 noise dwarfs the quality 10 original even after downscaling.
        let settings = ImageSection {
            jpeg_quality: 100,
            jpeg_fallback_quality: 10,
            ..ImageSection::default()
        };

        let outcome = optimize(&settings, RATIO, &jpg);
        let ImageOutcome::Resized { to, encoder, .. } = outcome else {
            panic!("expected a resize, got {outcome:?}");
        };
        assert_eq!(to, (120, 90));
        assert_eq!(encoder, "jpeg quality 10");
        assert_eq!(dimensions(&jpg), (120, 90));
    }
}
