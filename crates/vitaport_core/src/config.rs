use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_FFMPEG_URL: &str =
    "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip";
pub const DEFAULT_PNGQUANT_URL: &str = "https://pngquant.org/pngquant-windows.zip";

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PortConfig {
    #[serde(default)]
    pub scale: ScaleSection,
    #[serde(default)]
    pub images: ImageSection,
    #[serde(default)]
    pub audio: AudioSection,
    #[serde(default)]
    pub tools: ToolSection,
    #[serde(default)]
    pub downloads: DownloadSection,
    #[serde(default)]
    pub livearea: LiveareaSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScaleSection {
    pub source_width: u32,
    pub source_height: u32,
    pub target_width: u32,
    pub target_height: u32,
    /// Ratio applied to GUI config literals (960 / 1280).
    pub gui_ratio: f64,
}

impl Default for ScaleSection {
    fn default() -> Self {
        Self {
            source_width: 1280,
            source_height: 720,
            target_width: 960,
            target_height: 544,
            gui_ratio: 0.75,
        }
    }
}

impl ScaleSection {
    /// Uniform image ratio; the height ratio keeps every asset inside 544 lines.
    pub fn image_ratio(&self) -> f64 {
        if self.source_height == 0 {
            return 1.0;
        }
        f64::from(self.target_height) / f64::from(self.source_height)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ImageSection {
    pub recompress_min_bytes: u64,
    pub min_saving_bytes: u64,
    pub palette_threshold_bytes: u64,
    pub jpeg_quality: u8,
    pub jpeg_fallback_quality: u8,
    pub jpeg_resize_only_quality: u8,
    pub pngquant_quality: String,
    pub max_error_rate: f64,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            recompress_min_bytes: mib(0.05),
            min_saving_bytes: mib(0.001),
            palette_threshold_bytes: mib(0.15),
            jpeg_quality: 60,
            jpeg_fallback_quality: 70,
            jpeg_resize_only_quality: 95,
            pngquant_quality: "65-80".to_string(),
            max_error_rate: 0.10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AudioSection {
    pub voice_folder: String,
    pub bgm_min_bytes: u64,
    pub sfx_max_bytes: u64,
    pub max_growth_bytes: u64,
    pub channels: u8,
    pub sample_rate: u32,
    pub bgm: AudioProfile,
    pub sfx: AudioProfile,
    pub voice: AudioProfile,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            voice_folder: "voice".to_string(),
            bgm_min_bytes: mib(1.0),
            sfx_max_bytes: mib(0.1),
            max_growth_bytes: mib(0.01),
            channels: 2,
            sample_rate: 44_100,
            bgm: AudioProfile::new("64k", 3),
            sfx: AudioProfile::new("96k", 5),
            voice: AudioProfile::new("80k", 4),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AudioProfile {
    pub mp3_bitrate: String,
    /// libvorbis VBR quality, 0-10.
    pub ogg_quality: u8,
}

impl AudioProfile {
    fn new(mp3_bitrate: &str, ogg_quality: u8) -> Self {
        Self {
            mp3_bitrate: mp3_bitrate.to_string(),
            ogg_quality,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolSection {
    pub ffmpeg: Option<PathBuf>,
    pub pngquant: Option<PathBuf>,
    pub rpatool: Option<PathBuf>,
    pub unrpyc: Option<PathBuf>,
    pub git: Option<PathBuf>,
    pub python: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadSection {
    pub ffmpeg_url: String,
    pub pngquant_url: String,
    pub rpatool_repo: String,
    pub unrpyc_repo: String,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            ffmpeg_url: DEFAULT_FFMPEG_URL.to_string(),
            pngquant_url: DEFAULT_PNGQUANT_URL.to_string(),
            rpatool_repo: "https://codeberg.org/shiz/rpatool.git".to_string(),
            unrpyc_repo: "https://github.com/CensoredUsername/unrpyc.git".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LiveareaSection {
    pub icon_source: PathBuf,
    pub startup_source: PathBuf,
    pub background_source: PathBuf,
}

impl Default for LiveareaSection {
    fn default() -> Self {
        Self {
            icon_source: PathBuf::from("game/gui/window_icon.png"),
            startup_source: PathBuf::from("game/images/logo/zatotitle.png"),
            background_source: PathBuf::from("game/gui/main_menu.png"),
        }
    }
}

/// Load and parse a PortConfig from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PortConfig> {
    if !config_path.exists() {
        return Ok(PortConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PortConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> Result<String> {
    let body = toml::to_string_pretty(&PortConfig::default())
        .context("failed to serialize default config TOML")?;
    Ok(format!(
        "# vitaport configuration (materialized by `vitaport init`)\n# Relative paths resolve against the project root.\n\n{body}"
    ))
}

fn mib(value: f64) -> u64 {
    (value * MIB) as u64
}
