//! External collaborators used by the job lifecycle.
//!
//! The lifecycle only sees these traits; production wires them to the
//! generation service client and the FFmpeg stitcher.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use continuity_gen_client::{GenClient, GenClientError};
use continuity_media::{FfmpegStitcher, MediaError, MediaSource};
use continuity_models::{ArtifactRef, GenerationStatus, JobInputs, OperationHandle};

/// Failure reported by a capability.
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    /// May succeed if retried
    #[error("transient: {0}")]
    Transient(String),

    /// Will not succeed if retried
    #[error("{0}")]
    Permanent(String),
}

impl CapabilityError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, CapabilityError::Transient(_))
    }
}

impl From<GenClientError> for CapabilityError {
    fn from(e: GenClientError) -> Self {
        if e.is_retryable() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

impl From<MediaError> for CapabilityError {
    fn from(e: MediaError) -> Self {
        if e.is_retryable() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

/// Asynchronous generation: submit once, then poll the operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    async fn submit(&self, inputs: &JobInputs) -> Result<OperationHandle, CapabilityError>;

    async fn poll(&self, handle: &OperationHandle) -> Result<GenerationStatus, CapabilityError>;
}

/// Where a combined output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub path: PathBuf,
}

/// Combines artifacts, in order, into one output file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StitchingCapability: Send + Sync {
    async fn combine(
        &self,
        artifacts: &[ArtifactRef],
        output: &OutputSpec,
    ) -> Result<ArtifactRef, CapabilityError>;
}

#[async_trait]
impl GenerationCapability for GenClient {
    async fn submit(&self, inputs: &JobInputs) -> Result<OperationHandle, CapabilityError> {
        Ok(GenClient::submit(self, inputs).await?)
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<GenerationStatus, CapabilityError> {
        Ok(GenClient::poll(self, handle).await?)
    }
}

#[async_trait]
impl StitchingCapability for FfmpegStitcher {
    async fn combine(
        &self,
        artifacts: &[ArtifactRef],
        output: &OutputSpec,
    ) -> Result<ArtifactRef, CapabilityError> {
        let sources = artifacts
            .iter()
            .map(|artifact| MediaSource::parse(artifact.as_str()))
            .collect::<Result<Vec<_>, _>>()?;

        let report = self.stitch(&sources, &output.path).await?;
        Ok(ArtifactRef::new(report.output.to_string_lossy()))
    }
}
