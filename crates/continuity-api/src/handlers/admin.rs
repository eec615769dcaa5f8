//! Admin handlers.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::{info, warn};

use continuity_worker::RecoveryReport;

use crate::error::{ApiError, ApiResult};
use crate::security::{admin_key_matches, ADMIN_KEY_HEADER};
use crate::state::AppState;

fn require_admin(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let provided = headers.get(ADMIN_KEY_HEADER).and_then(|v| v.to_str().ok());
    if admin_key_matches(state.config.admin_api_key.as_deref(), provided) {
        Ok(())
    } else {
        warn!("Rejected admin request");
        Err(ApiError::forbidden("Admin access required"))
    }
}

/// Run one recovery sweep now.
pub async fn reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<RecoveryReport>> {
    require_admin(&state, &headers)?;

    let report = continuity_worker::sweep(&state.manager).await?;
    info!(
        timed_out = report.timed_out,
        requeued = report.requeued,
        refunded = report.refunded,
        "Admin reconcile complete"
    );
    Ok(Json(report))
}
