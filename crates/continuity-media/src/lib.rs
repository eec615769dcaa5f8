//! FFmpeg CLI wrapper for clip stitching.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation and timeouts via tokio
//! - Probing and normalizing clips before concatenation

pub mod command;
pub mod error;
pub mod probe;
pub mod progress;
pub mod source;
pub mod stitch;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
pub use source::MediaSource;
pub use stitch::{FfmpegStitcher, StitchConfig, StitchReport, TargetFormat};
