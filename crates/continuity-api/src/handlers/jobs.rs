//! Transition job handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use continuity_models::{CostBreakdown, JobId, JobInputs, JobRecord, JobState};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Maximum allowed limit for job listings.
const MAX_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// Job as returned to its owner.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: JobId,
    pub state: JobState,
    pub cost: u64,
    pub refunded: bool,
    pub inputs: JobInputs,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            cost: job.cost,
            refunded: job.refunded,
            inputs: job.inputs,
            progress: job.progress,
            message: job.last_message,
            generated_ref: job.generated_ref,
            output_ref: job.output_ref,
            failure_reason: job.failure_reason,
            deadline_at: job.deadline_at,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobResponse>,
}

/// Submit a transition job. Credits are taken before the job is accepted.
pub async fn submit_job(
    State(state): State<AppState>,
    user: AuthUser,
    Json(inputs): Json<JobInputs>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let job = state.manager.submit(&user.user_id, inputs).await?;

    info!(
        job_id = %job.id,
        user_id = %user.user_id,
        credits = job.cost,
        "Accepted transition job"
    );

    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// Price a job without submitting it.
pub async fn quote_job(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(inputs): Json<JobInputs>,
) -> ApiResult<Json<CostBreakdown>> {
    if let Some(message) = inputs.validation_message() {
        return Err(ApiError::Validation(message));
    }
    Ok(Json(state.manager.quote(&inputs)))
}

/// List the caller's jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let limit = query.limit.clamp(1, MAX_LIMIT);
    let jobs = state
        .manager
        .store()
        .list_user_jobs(&user.user_id, limit)
        .await?;

    Ok(Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobResponse::from).collect(),
    }))
}

/// Get one of the caller's jobs. Other users' jobs are reported as missing.
pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .manager
        .store()
        .get_job(&JobId::from_string(job_id))
        .await?
        .filter(|job| job.user_id == user.user_id)
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    Ok(Json(job.into()))
}

/// Cancel the caller's queued job and refund it.
pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .manager
        .cancel(&JobId::from_string(job_id), &user.user_id)
        .await?;

    Ok(Json(job.into()))
}
