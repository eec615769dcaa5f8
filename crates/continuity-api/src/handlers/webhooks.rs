//! Payment provider notifications.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::error::ApiResult;
use crate::metrics;
use crate::security::SIGNATURE_HEADER;
use crate::services::WebhookOutcome;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_after: Option<u64>,
}

/// Signed payment notification. The raw body is needed for the signature.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let outcome = match state.reconciler.handle(signature, &body).await {
        Ok(outcome) => outcome,
        Err(e) => {
            metrics::record_webhook_event("rejected");
            return Err(e);
        }
    };
    metrics::record_webhook_event(outcome.as_str());

    let balance_after = match outcome {
        WebhookOutcome::Credited { balance_after } => Some(balance_after),
        _ => None,
    };

    Ok(Json(WebhookResponse {
        received: true,
        outcome: outcome.as_str(),
        balance_after,
    }))
}
