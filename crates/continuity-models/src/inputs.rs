//! Job inputs: the two clips to bridge and the generation parameters.

use std::fmt;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;
use validator::{Validate, ValidationError};

/// Maximum artifact reference length.
pub const MAX_ARTIFACT_REF_LENGTH: usize = 2048;

/// Default generated transition duration in seconds.
pub const DEFAULT_DURATION_SECONDS: u32 = 8;

/// URL schemes accepted for artifact references.
const ALLOWED_SCHEMES: &[&str] = &["https", "http", "gs", "file"];

/// Reference to a media artifact (URL or absolute local path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the reference points at the local filesystem.
    pub fn is_local(&self) -> bool {
        self.0.starts_with("file://") || Path::new(&self.0).is_absolute()
    }

    /// Local path for `file://` URLs and absolute paths.
    pub fn local_path(&self) -> Option<String> {
        if let Some(rest) = self.0.strip_prefix("file://") {
            return Some(rest.to_string());
        }
        Path::new(&self.0).is_absolute().then(|| self.0.clone())
    }

    /// Check that the reference is well formed and uses an allowed scheme.
    pub fn check(&self) -> Result<(), &'static str> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return Err("artifact reference is empty");
        }
        if raw.len() > MAX_ARTIFACT_REF_LENGTH {
            return Err("artifact reference is too long");
        }
        if Path::new(raw).is_absolute() {
            return Ok(());
        }
        let url = Url::parse(raw).map_err(|_| "artifact reference is not a valid URL or absolute path")?;
        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err("artifact reference uses an unsupported scheme");
        }
        if url.scheme() != "file" && url.host_str().map_or(true, str::is_empty) {
            return Err("artifact reference has no host");
        }
        Ok(())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_artifact_ref(value: &ArtifactRef) -> Result<(), ValidationError> {
    value.check().map_err(|msg| {
        let mut err = ValidationError::new("artifact_ref");
        err.message = Some(msg.into());
        err
    })
}

/// Inputs of a transition job.
///
/// `clip_a` is the clip the transition starts from and `clip_c` the clip it
/// leads into; the generated bridge is placed between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct JobInputs {
    #[validate(custom(function = "validate_artifact_ref"))]
    pub clip_a: ArtifactRef,

    #[validate(custom(function = "validate_artifact_ref"))]
    pub clip_c: ArtifactRef,

    #[validate(length(min = 1, max = 2000))]
    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub negative_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 64))]
    pub style: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 500))]
    pub audio_prompt: Option<String>,

    /// Generated segment length in seconds
    #[serde(default = "default_duration")]
    #[validate(range(min = 4, max = 8))]
    pub duration_seconds: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0.0, max = 20.0))]
    pub guidance_scale: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 10))]
    pub motion_strength: Option<u8>,
}

fn default_duration() -> u32 {
    DEFAULT_DURATION_SECONDS
}

impl JobInputs {
    pub fn new(clip_a: ArtifactRef, clip_c: ArtifactRef, prompt: impl Into<String>) -> Self {
        Self {
            clip_a,
            clip_c,
            prompt: prompt.into(),
            negative_prompt: None,
            style: None,
            audio_prompt: None,
            duration_seconds: DEFAULT_DURATION_SECONDS,
            guidance_scale: None,
            motion_strength: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_seconds = seconds;
        self
    }

    /// Flatten `validator` errors into a single readable message.
    pub fn validation_message(&self) -> Option<String> {
        let errors = self.validate().err()?;
        let mut parts: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let detail = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "is invalid".to_string());
                format!("{}: {}", field, detail)
            })
            .collect();
        parts.sort();
        Some(parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> JobInputs {
        JobInputs::new(
            ArtifactRef::new("https://cdn.example.com/a.mp4"),
            ArtifactRef::new("gs://bucket/c.mp4"),
            "slow pan across the city",
        )
    }

    #[test]
    fn test_valid_inputs() {
        assert!(inputs().validate().is_ok());
        assert!(inputs().validation_message().is_none());
    }

    #[test]
    fn test_artifact_ref_schemes() {
        assert!(ArtifactRef::new("/data/clips/a.mp4").check().is_ok());
        assert!(ArtifactRef::new("file:///data/clips/a.mp4").check().is_ok());
        assert!(ArtifactRef::new("ftp://example.com/a.mp4").check().is_err());
        assert!(ArtifactRef::new("javascript:alert(1)").check().is_err());
        assert!(ArtifactRef::new("relative/path.mp4").check().is_err());
        assert!(ArtifactRef::new("").check().is_err());
    }

    #[test]
    fn test_local_path() {
        assert_eq!(
            ArtifactRef::new("file:///tmp/a.mp4").local_path().as_deref(),
            Some("/tmp/a.mp4")
        );
        assert_eq!(ArtifactRef::new("/tmp/a.mp4").local_path().as_deref(), Some("/tmp/a.mp4"));
        assert!(ArtifactRef::new("https://x.example/a.mp4").local_path().is_none());
    }

    #[test]
    fn test_invalid_fields_reported() {
        let mut bad = inputs();
        bad.prompt = String::new();
        bad.duration_seconds = 30;
        bad.clip_c = ArtifactRef::new("ftp://example.com/c.mp4");

        let msg = bad.validation_message().unwrap();
        assert!(msg.contains("prompt"));
        assert!(msg.contains("duration_seconds"));
        assert!(msg.contains("clip_c"));
    }

    #[test]
    fn test_duration_defaults_when_missing() {
        let json = r#"{"clip_a":"/a.mp4","clip_c":"/c.mp4","prompt":"x"}"#;
        let parsed: JobInputs = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.duration_seconds, DEFAULT_DURATION_SECONDS);
    }
}
