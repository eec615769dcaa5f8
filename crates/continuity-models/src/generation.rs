//! Status of an external generation operation.

use serde::{Deserialize, Serialize};

use crate::inputs::ArtifactRef;

/// What the generation service reports for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Still running
    Pending,
    /// Finished; the generated clip is at `artifact`
    Succeeded { artifact: ArtifactRef },
    /// Finished without output
    Failed { reason: String },
}

impl GenerationStatus {
    pub fn is_done(&self) -> bool {
        !matches!(self, GenerationStatus::Pending)
    }
}
