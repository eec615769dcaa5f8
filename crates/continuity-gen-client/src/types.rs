//! Generation service request/response types.

use serde::{Deserialize, Serialize};

use continuity_models::{ArtifactRef, GenerationStatus, JobInputs};

use crate::error::{GenClientError, GenClientResult};

/// Request to generate a transition between two clips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// Clip the generated segment starts from
    pub first_clip_uri: String,
    /// Clip the generated segment leads into
    pub last_clip_uri: String,
    pub duration_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motion_strength: Option<u8>,
}

impl GenerateRequest {
    pub fn from_inputs(model: impl Into<String>, inputs: &JobInputs) -> Self {
        Self {
            model: model.into(),
            prompt: inputs.prompt.clone(),
            first_clip_uri: inputs.clip_a.as_str().to_string(),
            last_clip_uri: inputs.clip_c.as_str().to_string(),
            duration_seconds: inputs.duration_seconds,
            negative_prompt: inputs.negative_prompt.clone(),
            style: inputs.style.clone(),
            audio_prompt: inputs.audio_prompt.clone(),
            guidance_scale: inputs.guidance_scale,
            motion_strength: inputs.motion_strength,
        }
    }
}

/// Operation created by a generate call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub video_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: Option<i32>,
    pub message: String,
}

/// Long-running operation status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub response: Option<OperationResult>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl OperationResponse {
    /// Map to the generation status seen by the job lifecycle.
    pub fn into_status(self) -> GenClientResult<GenerationStatus> {
        if !self.done {
            return Ok(GenerationStatus::Pending);
        }
        if let Some(error) = self.error {
            return Ok(GenerationStatus::Failed {
                reason: error.message,
            });
        }
        match self.response {
            Some(result) if !result.video_uri.is_empty() => Ok(GenerationStatus::Succeeded {
                artifact: ArtifactRef::new(result.video_uri),
            }),
            _ => Err(GenClientError::InvalidResponse(format!(
                "operation {} is done without result or error",
                self.name
            ))),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(json: &str) -> OperationResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_pending_operation() {
        let status = op(r#"{"name":"operations/1"}"#).into_status().unwrap();
        assert_eq!(status, GenerationStatus::Pending);
    }

    #[test]
    fn test_succeeded_operation() {
        let status = op(r#"{"name":"operations/1","done":true,"response":{"video_uri":"gs://b/out.mp4"}}"#)
            .into_status()
            .unwrap();
        assert_eq!(
            status,
            GenerationStatus::Succeeded {
                artifact: ArtifactRef::new("gs://b/out.mp4")
            }
        );
    }

    #[test]
    fn test_failed_operation() {
        let status = op(r#"{"name":"operations/1","done":true,"error":{"code":3,"message":"unsafe prompt"}}"#)
            .into_status()
            .unwrap();
        assert_eq!(
            status,
            GenerationStatus::Failed {
                reason: "unsafe prompt".into()
            }
        );
    }

    #[test]
    fn test_done_without_payload_is_invalid() {
        assert!(op(r#"{"name":"operations/1","done":true}"#).into_status().is_err());
    }
}
