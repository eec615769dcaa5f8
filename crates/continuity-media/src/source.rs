//! Media inputs accepted by FFmpeg.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{MediaError, MediaResult};

/// A clip FFmpeg can read directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// File on local disk
    Local(PathBuf),
    /// HTTP(S) URL streamed by FFmpeg
    Remote(String),
}

impl MediaSource {
    /// Parse an artifact reference.
    ///
    /// Accepts absolute paths, `file://` URLs and `http(s)://` URLs. Other
    /// schemes must be fetched by the caller first.
    pub fn parse(reference: &str) -> MediaResult<Self> {
        if let Some(path) = reference.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        if reference.starts_with("https://") || reference.starts_with("http://") {
            return Ok(Self::Remote(reference.to_string()));
        }
        if Path::new(reference).is_absolute() {
            return Ok(Self::Local(PathBuf::from(reference)));
        }
        Err(MediaError::UnsupportedSource(reference.to_string()))
    }

    /// Argument passed to `-i`.
    pub fn as_ffmpeg_arg(&self) -> String {
        match self {
            Self::Local(path) => path.to_string_lossy().to_string(),
            Self::Remote(url) => url.clone(),
        }
    }

    /// Fail early on missing local files.
    pub fn ensure_exists(&self) -> MediaResult<()> {
        match self {
            Self::Local(path) if !path.exists() => Err(MediaError::FileNotFound(path.clone())),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(
            MediaSource::parse("/data/a.mp4").unwrap(),
            MediaSource::Local(PathBuf::from("/data/a.mp4"))
        );
        assert_eq!(
            MediaSource::parse("file:///data/a.mp4").unwrap(),
            MediaSource::Local(PathBuf::from("/data/a.mp4"))
        );
        assert!(matches!(
            MediaSource::parse("https://cdn.example.com/a.mp4").unwrap(),
            MediaSource::Remote(_)
        ));
        assert!(matches!(
            MediaSource::parse("gs://bucket/a.mp4"),
            Err(MediaError::UnsupportedSource(_))
        ));
        assert!(MediaSource::parse("relative/a.mp4").is_err());
    }

    #[test]
    fn test_missing_local_file() {
        let source = MediaSource::parse("/definitely/not/here.mp4").unwrap();
        assert!(matches!(source.ensure_exists(), Err(MediaError::FileNotFound(_))));
        assert!(MediaSource::Remote("https://x/y.mp4".into()).ensure_exists().is_ok());
    }
}
