//! Join clips into a single video.
//!
//! Each input is normalized to an MPEG-TS segment with identical resolution,
//! frame rate and audio layout, then the segments are joined with the concat
//! demuxer without re-encoding. Intermediates live in a scratch directory
//! next to the output and are removed when stitching finishes.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_video, VideoInfo};
use crate::source::MediaSource;

/// Encoding settings for stitched output.
#[derive(Debug, Clone)]
pub struct StitchConfig {
    pub crf: u8,
    pub preset: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    /// Limit for each FFmpeg invocation
    pub step_timeout_secs: Option<u64>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            crf: 23,
            preset: "fast".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 48_000,
            step_timeout_secs: Some(600),
        }
    }
}

impl StitchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            step_timeout_secs: std::env::var("STITCH_STEP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(defaults.step_timeout_secs),
            ..defaults
        }
    }
}

/// Resolution and frame rate every segment is converted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetFormat {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl TargetFormat {
    /// Largest width, height and frame rate across inputs, with even
    /// dimensions for yuv420p.
    pub fn from_inputs(infos: &[VideoInfo]) -> Option<Self> {
        if infos.is_empty() {
            return None;
        }
        let width = infos.iter().map(|i| i.width).max().unwrap_or(0);
        let height = infos.iter().map(|i| i.height).max().unwrap_or(0);
        let fps = infos.iter().map(|i| i.fps).fold(0.0_f64, f64::max);
        Some(Self {
            width: round_up_even(width),
            height: round_up_even(height),
            fps,
        })
    }

    /// Scale to fit, letterbox to the target size, fix the frame rate.
    pub fn video_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps:.3}",
            w = self.width,
            h = self.height,
            fps = self.fps
        )
    }
}

fn round_up_even(value: u32) -> u32 {
    value + value % 2
}

/// Result of a successful stitch.
#[derive(Debug, Clone)]
pub struct StitchReport {
    pub output: PathBuf,
    pub format: TargetFormat,
    /// Sum of input durations in seconds
    pub duration_secs: f64,
}

/// Concat demuxer list entry, quoting single quotes.
fn concat_entry(path: &Path) -> String {
    format!("file '{}'\n", path.to_string_lossy().replace('\'', r"'\''"))
}

/// FFmpeg-backed clip stitcher.
#[derive(Debug, Clone, Default)]
pub struct FfmpegStitcher {
    config: StitchConfig,
}

impl FfmpegStitcher {
    pub fn new(config: StitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    fn runner(&self) -> FfmpegRunner {
        match self.config.step_timeout_secs {
            Some(secs) => FfmpegRunner::new().with_timeout(secs),
            None => FfmpegRunner::new(),
        }
    }

    /// Stitch `sources` in order into `output`.
    pub async fn stitch(&self, sources: &[MediaSource], output: &Path) -> MediaResult<StitchReport> {
        if sources.is_empty() {
            return Err(MediaError::InvalidVideo("nothing to stitch".to_string()));
        }

        let started = Instant::now();
        let result = self.stitch_inner(sources, output).await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("media_stitch_total", "outcome" => outcome).increment(1);
        metrics::histogram!("media_stitch_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    async fn stitch_inner(&self, sources: &[MediaSource], output: &Path) -> MediaResult<StitchReport> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        // Same filesystem as the output so the final rename is atomic
        let scratch = tempfile::Builder::new()
            .prefix(".stitch-")
            .tempdir_in(parent)?;

        let mut infos = Vec::with_capacity(sources.len());
        for source in sources {
            infos.push(probe_video(source).await?);
        }
        let format = TargetFormat::from_inputs(&infos)
            .ok_or_else(|| MediaError::InvalidVideo("no probe results".to_string()))?;

        info!(
            inputs = sources.len(),
            width = format.width,
            height = format.height,
            fps = format.fps,
            "Stitching clips"
        );

        let mut list = String::new();
        for (index, (source, info)) in sources.iter().zip(&infos).enumerate() {
            let segment = scratch.path().join(format!("part-{:02}.ts", index));
            self.normalize(source, info, &format, &segment).await?;
            list.push_str(&concat_entry(&segment));
        }

        let list_path = scratch.path().join("concat.txt");
        tokio::fs::write(&list_path, list).await?;

        let joined = scratch.path().join("joined.mp4");
        let concat = FfmpegCommand::new(list_path.to_string_lossy(), &joined)
            .input_args(["-f", "concat", "-safe", "0"])
            .output_args(["-c", "copy", "-bsf:a", "aac_adtstoasc", "-movflags", "+faststart"]);
        self.runner().run(&concat).await?;

        tokio::fs::rename(&joined, output).await?;

        let duration_secs = infos.iter().map(|i| i.duration).sum();
        info!(output = %output.display(), duration_secs, "Stitched clips");

        Ok(StitchReport {
            output: output.to_path_buf(),
            format,
            duration_secs,
        })
    }

    /// Re-encode one input to the target format as MPEG-TS.
    async fn normalize(
        &self,
        source: &MediaSource,
        info: &VideoInfo,
        format: &TargetFormat,
        segment: &Path,
    ) -> MediaResult<()> {
        let mut cmd = FfmpegCommand::new(source.as_ffmpeg_arg(), segment);

        // Silent track so every segment has the same streams
        cmd = if info.has_audio {
            cmd.map("0:v:0").map("0:a:0")
        } else {
            cmd.add_input(format!(
                "anullsrc=channel_layout=stereo:sample_rate={}",
                self.config.audio_sample_rate
            ))
            .input_args(["-f", "lavfi"])
            .map("0:v:0")
            .map("1:a:0")
            .output_arg("-shortest")
        };

        let cmd = cmd
            .video_filter(format.video_filter())
            .video_codec("libx264")
            .preset(self.config.preset.clone())
            .crf(self.config.crf)
            .output_args(["-pix_fmt", "yuv420p"])
            .audio_codec("aac")
            .audio_bitrate(self.config.audio_bitrate.clone())
            .output_args(["-ar".to_string(), self.config.audio_sample_rate.to_string()])
            .output_args(["-ac", "2", "-f", "mpegts"]);

        let total_ms = (info.duration * 1000.0) as i64;
        let label = source.to_string();
        self.runner()
            .run_with_progress(&cmd, move |progress| {
                debug!(
                    source = %label,
                    percent = progress.percentage(total_ms),
                    "Normalizing clip"
                );
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::check_ffmpeg;

    fn info(width: u32, height: u32, fps: f64) -> VideoInfo {
        VideoInfo {
            duration: 4.0,
            width,
            height,
            fps,
            codec: "h264".to_string(),
            has_audio: true,
        }
    }

    #[test]
    fn test_target_format_takes_maximums() {
        let format =
            TargetFormat::from_inputs(&[info(1280, 720, 24.0), info(1080, 1921, 30.0), info(640, 480, 25.0)])
                .unwrap();
        assert_eq!(format.width, 1280);
        assert_eq!(format.height, 1922);
        assert!((format.fps - 30.0).abs() < f64::EPSILON);
        assert!(TargetFormat::from_inputs(&[]).is_none());
    }

    #[test]
    fn test_video_filter() {
        let format = TargetFormat {
            width: 1920,
            height: 1080,
            fps: 30.0,
        };
        assert_eq!(
            format.video_filter(),
            "scale=1920:1080:force_original_aspect_ratio=decrease,pad=1920:1080:(ow-iw)/2:(oh-ih)/2,setsar=1,fps=30.000"
        );
    }

    #[test]
    fn test_concat_entry_quotes() {
        assert_eq!(concat_entry(Path::new("/tmp/a.ts")), "file '/tmp/a.ts'\n");
        assert_eq!(concat_entry(Path::new("/tmp/it's.ts")), "file '/tmp/it'\\''s.ts'\n");
    }

    #[tokio::test]
    async fn test_stitch_requires_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegStitcher::default()
            .stitch(&[], &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidVideo(_)));
    }

    #[tokio::test]
    async fn test_stitch_generated_clips() {
        if check_ffmpeg().is_err() || crate::command::check_ffprobe().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let mut sources = Vec::new();
        for (name, size) in [("a.mp4", "320x240"), ("b.mp4", "160x120")] {
            let path = dir.path().join(name);
            let cmd = FfmpegCommand::new(format!("testsrc=size={}:rate=25:duration=1", size), &path)
                .input_args(["-f", "lavfi"])
                .video_codec("libx264")
                .output_args(["-pix_fmt", "yuv420p"]);
            FfmpegRunner::new().run(&cmd).await.unwrap();
            sources.push(MediaSource::Local(path));
        }

        let output = dir.path().join("out").join("transition.mp4");
        let report = FfmpegStitcher::default().stitch(&sources, &output).await.unwrap();

        assert!(output.exists());
        assert_eq!(report.format.width, 320);
        let stitched = probe_video(&MediaSource::Local(output)).await.unwrap();
        assert_eq!(stitched.width, 320);
        assert!(stitched.has_audio);

        // Only the output remains in its directory
        let mut entries = tokio::fs::read_dir(dir.path().join("out")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names.len(), 1);
    }
}
