//! Transition job definitions and lifecycle state machine.
//!
//! A job moves strictly forward through
//! `submitted → debited → queued → running → polling` and ends in exactly one
//! of the terminal states `succeeded`, `failed` or `timed_out`. No state is
//! ever revisited.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::inputs::JobInputs;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Verified user identity key (the identity provider's subject).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of a long-running operation at the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct OperationHandle(pub String);

impl OperationHandle {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a transition job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Request accepted, nothing charged yet
    #[default]
    Submitted,
    /// Credits debited for this job
    Debited,
    /// Waiting for a dispatcher slot
    Queued,
    /// Submitting to the generation service
    Running,
    /// Waiting on the generation operation
    Polling,
    /// Output produced and stored
    Succeeded,
    /// Hard failure, refunded
    Failed,
    /// Liveness deadline elapsed, refunded
    TimedOut,
}

impl JobState {
    /// All states in lifecycle order.
    pub const ALL: [JobState; 8] = [
        JobState::Submitted,
        JobState::Debited,
        JobState::Queued,
        JobState::Running,
        JobState::Polling,
        JobState::Succeeded,
        JobState::Failed,
        JobState::TimedOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "submitted",
            JobState::Debited => "debited",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed_out",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::TimedOut)
    }

    /// Terminal states that return the job's credits.
    pub fn is_refundable(&self) -> bool {
        matches!(self, JobState::Failed | JobState::TimedOut)
    }

    /// States in which an external operation may be in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Polling)
    }

    fn rank(&self) -> u8 {
        match self {
            JobState::Submitted => 0,
            JobState::Debited => 1,
            JobState::Queued => 2,
            JobState::Running => 3,
            JobState::Polling => 4,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut => 5,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Forward skips are allowed (a queued job can fail before it runs),
    /// revisits and terminal-to-terminal moves are not. Only a job that has
    /// been handed to the generation service can time out.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        if self.is_terminal() || next.rank() <= self.rank() {
            return false;
        }
        match next {
            JobState::TimedOut => self.is_active(),
            _ => true,
        }
    }

    /// States from which `next` is reachable.
    pub fn predecessors(next: JobState) -> Vec<JobState> {
        JobState::ALL
            .into_iter()
            .filter(|state| state.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| JobStateParseError(s.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("Unknown job state: {0}")]
pub struct JobStateParseError(String);

/// A durable job record owned by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Owning user
    pub user_id: UserId,

    /// Cost in credits, fixed at submission
    pub cost: u64,

    /// Lifecycle state
    pub state: JobState,

    /// Input artifacts and generation parameters
    pub inputs: JobInputs,

    /// Whether the cost was debited
    pub debited: bool,

    /// Whether the cost was refunded
    pub refunded: bool,

    /// Handle of the external generation operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_handle: Option<OperationHandle>,

    /// Clip returned by the generation service, kept after stitching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_ref: Option<String>,

    /// Stitched output location (set on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,

    /// Completion estimate, 0 to 100, never decreasing
    pub progress: u8,

    /// Most recent progress or failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,

    /// Failure reason (set on failure or timeout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// When the job entered running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_started_at: Option<DateTime<Utc>>,

    /// Liveness deadline, stamped when the job enters running
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new submitted job.
    pub fn new(user_id: UserId, inputs: JobInputs, cost: u64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id,
            cost,
            state: JobState::Submitted,
            inputs,
            debited: false,
            refunded: false,
            operation_handle: None,
            generated_ref: None,
            output_ref: None,
            progress: 0,
            last_message: None,
            failure_reason: None,
            running_started_at: None,
            deadline_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether the liveness deadline has passed at `now`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.deadline_at.map(|deadline| now >= deadline).unwrap_or(false)
    }

    /// Whether a refund is owed but has not been applied.
    pub fn needs_refund(&self) -> bool {
        self.state.is_refundable() && self.debited && !self.refunded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::ArtifactRef;

    fn sample_inputs() -> JobInputs {
        JobInputs::new(
            ArtifactRef::new("https://cdn.example.com/a.mp4"),
            ArtifactRef::new("https://cdn.example.com/c.mp4"),
            "smooth dolly between scenes",
        )
    }

    #[test]
    fn test_forward_transitions() {
        assert!(JobState::Submitted.can_transition_to(JobState::Debited));
        assert!(JobState::Debited.can_transition_to(JobState::Queued));
        assert!(JobState::Queued.can_transition_to(JobState::Running));
        assert!(JobState::Running.can_transition_to(JobState::Polling));
        assert!(JobState::Polling.can_transition_to(JobState::Succeeded));
        assert!(JobState::Polling.can_transition_to(JobState::Failed));
        assert!(JobState::Polling.can_transition_to(JobState::TimedOut));
        assert!(JobState::Queued.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_no_revisits_or_terminal_moves() {
        assert!(!JobState::Polling.can_transition_to(JobState::Running));
        assert!(!JobState::Running.can_transition_to(JobState::Running));
        assert!(!JobState::Succeeded.can_transition_to(JobState::Failed));
        assert!(!JobState::TimedOut.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Failed.can_transition_to(JobState::TimedOut));
    }

    #[test]
    fn test_timeout_only_from_active_states() {
        assert!(!JobState::Queued.can_transition_to(JobState::TimedOut));
        assert_eq!(
            JobState::predecessors(JobState::TimedOut),
            vec![JobState::Running, JobState::Polling]
        );
    }

    #[test]
    fn test_state_string_roundtrip() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().ok(), Some(state));
        }
        assert_eq!("processing".parse::<JobState>().ok(), None);
    }

    #[test]
    fn test_needs_refund() {
        let mut job = JobRecord::new(UserId::new("user123"), sample_inputs(), 5);
        job.debited = true;
        job.state = JobState::Succeeded;
        assert!(!job.needs_refund());

        job.state = JobState::TimedOut;
        assert!(job.needs_refund());

        job.refunded = true;
        assert!(!job.needs_refund());
    }

    #[test]
    fn test_deadline_check() {
        let mut job = JobRecord::new(UserId::new("user123"), sample_inputs(), 5);
        let now = Utc::now();
        assert!(!job.is_past_deadline(now));

        job.deadline_at = Some(now - chrono::Duration::seconds(1));
        assert!(job.is_past_deadline(now));
    }
}
