//! Re-encode `game/audio` with ffmpeg using per-class bitrate profiles.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::bootstrap::{InstallOptions, ensure_tool};
use crate::config::{AudioProfile, AudioSection, PortConfig};
use crate::filesystem::{collect_files, file_size, format_mib, has_extension};
use crate::runtime::ResolvedPaths;
use crate::tools::{Tool, ToolKind};

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "flac", "m4a", "aac"];
const FFMPEG_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioClass {
    Bgm,
    Sfx,
    Voice,
}

impl AudioClass {
    pub fn profile(self, settings: &AudioSection) -> &AudioProfile {
        match self {
            Self::Bgm => &settings.bgm,
            Self::Sfx => &settings.sfx,
            Self::Voice => &settings.voice,
        }
    }
}

/// Voice folder wins, then size: large is music, tiny is an effect, the rest is music.
pub fn classify(relative_path: &str, bytes: u64, settings: &AudioSection) -> AudioClass {
    if relative_path
        .to_ascii_lowercase()
        .contains(&settings.voice_folder.to_ascii_lowercase())
    {
        AudioClass::Voice
    } else if bytes > settings.bgm_min_bytes {
        AudioClass::Bgm
    } else if bytes < settings.sfx_max_bytes {
        AudioClass::Sfx
    } else {
        AudioClass::Bgm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Mp3,
    Vorbis,
}

impl Codec {
    /// mp3 stays mp3; everything else ends up as Ogg Vorbis.
    pub fn for_path(path: &Path) -> Codec {
        if has_extension(path, &["mp3"]) {
            Codec::Mp3
        } else {
            Codec::Vorbis
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Vorbis => "ogg",
        }
    }

    fn describe(self, profile: &AudioProfile) -> String {
        match self {
            Self::Mp3 => format!("mp3 {}", profile.mp3_bitrate),
            Self::Vorbis => format!("ogg q{}", profile.ogg_quality),
        }
    }
}

/// Files not already mp3/ogg are converted to `.ogg` and the original removed.
pub fn is_conversion(path: &Path) -> bool {
    !has_extension(path, &["mp3", "ogg"])
}

pub fn ffmpeg_args(
    input: &Path,
    output: &Path,
    codec: Codec,
    profile: &AudioProfile,
    settings: &AudioSection,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.as_os_str().to_owned()];
    match codec {
        Codec::Mp3 => args.extend([
            "-codec:a".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            profile.mp3_bitrate.clone().into(),
        ]),
        Codec::Vorbis => args.extend([
            "-codec:a".into(),
            "libvorbis".into(),
            "-q:a".into(),
            profile.ogg_quality.to_string().into(),
        ]),
    }
    args.extend([
        "-ac".into(),
        settings.channels.to_string().into(),
        "-ar".into(),
        settings.sample_rate.to_string().into(),
        "-y".into(),
        output.as_os_str().to_owned(),
    ]);
    args
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudioOutcome {
    Compressed {
        class: AudioClass,
        old_bytes: u64,
        new_bytes: u64,
        encoder: String,
    },
    Converted {
        class: AudioClass,
        output: PathBuf,
        old_bytes: u64,
        new_bytes: u64,
        encoder: String,
    },
    /// Re-encoding made the file larger; the original is kept.
    Grew {
        class: AudioClass,
        old_bytes: u64,
        new_bytes: u64,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioReport {
    pub ffmpeg: String,
    pub processed: usize,
    pub converted: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub bytes_saved: u64,
    pub bytes_grown: u64,
}

impl AudioReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, outcome: &AudioOutcome) {
        let (old_bytes, new_bytes) = match outcome {
            AudioOutcome::Grew { .. } => {
                self.skipped += 1;
                return;
            }
            AudioOutcome::Compressed {
                old_bytes,
                new_bytes,
                ..
            } => (*old_bytes, *new_bytes),
            AudioOutcome::Converted {
                old_bytes,
                new_bytes,
                ..
            } => {
                self.converted += 1;
                (*old_bytes, *new_bytes)
            }
        };
        self.processed += 1;
        if new_bytes <= old_bytes {
            self.bytes_saved += old_bytes - new_bytes;
        } else {
            self.bytes_grown += new_bytes - old_bytes;
        }
    }
}

/// Check the audio directory, make sure ffmpeg exists, then transcode.
pub fn run_audio(
    paths: &ResolvedPaths,
    config: &PortConfig,
    install: InstallOptions,
) -> Result<AudioReport> {
    ensure_audio_dir(paths)?;
    let ffmpeg = ensure_tool(
        ToolKind::Ffmpeg,
        paths,
        &config.tools,
        &config.downloads,
        install,
    )?;
    process_audio(paths, &config.audio, &ffmpeg)
}

fn ensure_audio_dir(paths: &ResolvedPaths) -> Result<()> {
    if !paths.audio_dir.is_dir() {
        bail!(
            "Audio directory does not exist: {}",
            paths.audio_dir.display()
        );
    }
    Ok(())
}

pub fn process_audio(
    paths: &ResolvedPaths,
    settings: &AudioSection,
    ffmpeg: &Tool,
) -> Result<AudioReport> {
    ensure_audio_dir(paths)?;
    let mut report = AudioReport {
        ffmpeg: ffmpeg.display(),
        ..AudioReport::default()
    };
    info!("transcoding {}", paths.relative_display(&paths.audio_dir));

    for file in collect_files(&paths.audio_dir, AUDIO_EXTENSIONS)? {
        let relative = paths.relative_display(&file);
        match transcode(&file, &relative, settings, ffmpeg) {
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
    Ok(report)
}

fn log_outcome(relative: &str, outcome: &AudioOutcome) {
    match outcome {
        AudioOutcome::Compressed {
            old_bytes,
            new_bytes,
            encoder,
            ..
        } => debug!(
            "compressed {relative} ({} -> {}) [{encoder}]",
            format_mib(*old_bytes),
            format_mib(*new_bytes)
        ),
        AudioOutcome::Converted {
            output,
            old_bytes,
            new_bytes,
            encoder,
            ..
        } => debug!(
            "converted {relative} -> {} ({} -> {}) [{encoder}]",
            output.display(),
            format_mib(*old_bytes),
            format_mib(*new_bytes)
        ),
        AudioOutcome::Grew { old_bytes, .. } => debug!(
            "skipped {relative}: re-encoding grew it past {}",
            format_mib(*old_bytes)
        ),
    }
}

fn transcode(
    path: &Path,
    relative: &str,
    settings: &AudioSection,
    ffmpeg: &Tool,
) -> Result<AudioOutcome> {
    let old_bytes = file_size(path)?;
    let class = classify(relative, old_bytes, settings);
    let profile = class.profile(settings);
    let codec = Codec::for_path(path);
    let dir = path.parent().unwrap_or(Path::new("."));

    let temp = tempfile::Builder::new()
        .prefix(".vitaport-")
        .suffix(&format!(".{}", codec.extension()))
        .tempfile_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    ffmpeg.run_checked(
        ffmpeg_args(path, temp.path(), codec, profile, settings),
        Some(FFMPEG_TIMEOUT),
    )?;
    let new_bytes = file_size(temp.path())?;
    if new_bytes == 0 {
        bail!("ffmpeg produced an empty file");
    }
    let encoder = codec.describe(profile);

    if is_conversion(path) {
        let output = path.with_extension(codec.extension());
        persist(temp, &output)?;
        fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
        return Ok(AudioOutcome::Converted {
            class,
            output,
            old_bytes,
            new_bytes,
            encoder,
        });
    }

    if new_bytes > old_bytes + settings.max_growth_bytes {
        return Ok(AudioOutcome::Grew {
            class,
            old_bytes,
            new_bytes,
        });
    }
    persist(temp, path)?;
    Ok(AudioOutcome::Compressed {
        class,
        old_bytes,
        new_bytes,
        encoder,
    })
}

fn persist(temp: NamedTempFile, target: &Path) -> Result<()> {
    temp.persist(target)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to replace {}", target.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::path::Path;

    use super::{AudioClass, AudioOutcome, AudioReport, Codec, classify, ffmpeg_args, is_conversion};
    use crate::config::AudioSection;

    const KIB: u64 = 1024;

    #[test]
    fn classify_prefers_voice_folder_then_size() {
        let settings = AudioSection::default();
        assert_eq!(
            classify("game/audio/Voice/ch1/line.ogg", 5 * 1024 * KIB, &settings),
            AudioClass::Voice
        );
        assert_eq!(
            classify("game/audio/bgm/theme.ogg", 2 * 1024 * KIB, &settings),
            AudioClass::Bgm
        );
        assert_eq!(
            classify("game/audio/se/click.ogg", 20 * KIB, &settings),
            AudioClass::Sfx
        );
        assert_eq!(
            classify("game/audio/se/door.ogg", 500 * KIB, &settings),
            AudioClass::Bgm
        );
    }

    #[test]
    fn codec_and_conversion_follow_extension() {
        assert_eq!(Codec::for_path(Path::new("a/theme.MP3")), Codec::Mp3);
        assert_eq!(Codec::for_path(Path::new("a/theme.ogg")), Codec::Vorbis);
        assert_eq!(Codec::for_path(Path::new("a/theme.wav")), Codec::Vorbis);
        assert!(!is_conversion(Path::new("a/theme.ogg")));
        assert!(is_conversion(Path::new("a/theme.flac")));
    }

    #[test]
    fn ffmpeg_args_use_profile_and_stereo_44k() {
        let settings = AudioSection::default();
        let mp3 = ffmpeg_args(
            Path::new("in.mp3"),
            Path::new("out.mp3"),
            Codec::Mp3,
            AudioClass::Sfx.profile(&settings),
            &settings,
        );
        let expected: Vec<OsString> = [
            "-i", "in.mp3", "-codec:a", "libmp3lame", "-b:a", "96k", "-ac", "2", "-ar", "44100",
            "-y", "out.mp3",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        assert_eq!(mp3, expected);

        let ogg = ffmpeg_args(
            Path::new("in.wav"),
            Path::new("out.ogg"),
            Codec::Vorbis,
            AudioClass::Bgm.profile(&settings),
            &settings,
        );
        assert_eq!(ogg[2..6], ["-codec:a", "libvorbis", "-q:a", "3"].map(OsString::from));
    }

    #[test]
    fn report_counts_growth_as_skip() {
        let mut report = AudioReport::default();
        report.record(&AudioOutcome::Grew {
            class: AudioClass::Sfx,
            old_bytes: 10,
            new_bytes: 50_000,
        });
        report.record(&AudioOutcome::Compressed {
            class: AudioClass::Bgm,
            old_bytes: 1000,
            new_bytes: 600,
            encoder: "ogg q3".to_string(),
        });
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.bytes_saved, 400);
        assert_eq!(report.bytes_grown, 0);
        assert!(report.success());
    }

    #[cfg(unix)]
    mod with_fake_ffmpeg {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        use tempfile::tempdir;

        use super::super::process_audio;
        use crate::config::AudioSection;
        use crate::runtime::ResolvedPaths;
        use crate::tools::{Tool, ToolKind, ToolSource};

        /// Writes `bytes` bytes to the last argument, like a real encode would.
        fn fake_ffmpeg(dir: &Path, bytes: usize) -> Tool {
            let path = dir.join("ffmpeg");
            let script = format!(
                "#!/bin/sh\nfor last; do :; done\nhead -c {bytes} /dev/zero > \"$last\"\n"
            );
            fs::write(&path, script).expect("write script");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
            Tool {
                kind: ToolKind::Ffmpeg,
                path,
                source: ToolSource::Env,
                interpreter: None,
            }
        }

        #[test]
        fn converts_wav_and_compresses_ogg() {
            let temp = tempdir().expect("tempdir");
            let paths = ResolvedPaths::for_root(temp.path());
            fs::create_dir_all(paths.audio_dir.join("bgm")).expect("mkdir");
            fs::write(paths.audio_dir.join("bgm/theme.wav"), vec![1u8; 4096]).expect("write");
            fs::write(paths.audio_dir.join("bgm/loop.ogg"), vec![1u8; 4096]).expect("write");
            let ffmpeg = fake_ffmpeg(temp.path(), 1000);

            let report =
                process_audio(&paths, &AudioSection::default(), &ffmpeg).expect("process");
            assert!(report.success(), "{:?}", report.errors);
            assert_eq!(report.processed, 2);
            assert_eq!(report.converted, 1);
            assert!(!paths.audio_dir.join("bgm/theme.wav").exists());
            assert_eq!(
                fs::metadata(paths.audio_dir.join("bgm/theme.ogg"))
                    .expect("converted")
                    .len(),
                1000
            );
            assert_eq!(
                fs::metadata(paths.audio_dir.join("bgm/loop.ogg"))
                    .expect("compressed")
                    .len(),
                1000
            );
            assert_eq!(report.bytes_saved, 2 * (4096 - 1000));
        }

        #[test]
        fn growing_reencode_keeps_original() {
            let temp = tempdir().expect("tempdir");
            let paths = ResolvedPaths::for_root(temp.path());
            fs::create_dir_all(&paths.audio_dir).expect("mkdir");
            let original = paths.audio_dir.join("click.mp3");
            fs::write(&original, vec![1u8; 100]).expect("write");
            let ffmpeg = fake_ffmpeg(temp.path(), 64 * 1024);

            let report =
                process_audio(&paths, &AudioSection::default(), &ffmpeg).expect("process");
            assert_eq!(report.skipped, 1);
            assert_eq!(fs::metadata(&original).expect("kept").len(), 100);
            let leftovers = fs::read_dir(&paths.audio_dir).expect("read dir").count();
            assert_eq!(leftovers, 1);
        }

        #[test]
        fn missing_audio_dir_fails() {
            let temp = tempdir().expect("tempdir");
            let paths = ResolvedPaths::for_root(temp.path());
            let ffmpeg = fake_ffmpeg(temp.path(), 10);
            let error = process_audio(&paths, &AudioSection::default(), &ffmpeg)
                .expect_err("must fail");
            assert!(error.to_string().contains("Audio directory does not exist"));
        }
    }
}
