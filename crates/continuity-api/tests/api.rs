//! End-to-end tests driving the router with in-process requests.
//!
//! The generation service never finishes and no dispatcher runs, so
//! submitted jobs stay queued unless a test moves them.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use continuity_api::security::{sign_payload, ADMIN_KEY_HEADER, SIGNATURE_HEADER};
use continuity_api::{create_router, ApiConfig, AppState, AuthConfig};
use continuity_ledger::{AccountingEngine, LedgerConfig, LedgerStore};
use continuity_models::{ArtifactRef, GenerationStatus, JobInputs, OperationHandle};
use continuity_worker::{
    CapabilityError, GenerationCapability, JobManager, OutputSpec, StitchingCapability,
    WorkerConfig,
};

const JWT_SECRET: &str = "jwt-test-secret";
const WEBHOOK_SECRET: &str = "whsec_test";
const ADMIN_KEY: &str = "admin-test-key";

struct PendingGeneration;

#[async_trait]
impl GenerationCapability for PendingGeneration {
    async fn submit(&self, _inputs: &JobInputs) -> Result<OperationHandle, CapabilityError> {
        Ok(OperationHandle::new("operations/pending"))
    }

    async fn poll(&self, _handle: &OperationHandle) -> Result<GenerationStatus, CapabilityError> {
        Ok(GenerationStatus::Pending)
    }
}

struct NoopStitcher;

#[async_trait]
impl StitchingCapability for NoopStitcher {
    async fn combine(
        &self,
        _artifacts: &[ArtifactRef],
        output: &OutputSpec,
    ) -> Result<ArtifactRef, CapabilityError> {
        Ok(ArtifactRef::new(output.path.to_string_lossy()))
    }
}

async fn app(dir: &Path) -> Router {
    let store = LedgerStore::open(LedgerConfig::with_path(dir.join("ledger.db")))
        .await
        .unwrap();
    let manager = JobManager::new(
        AccountingEngine::new(store),
        Arc::new(PendingGeneration),
        Arc::new(NoopStitcher),
        WorkerConfig {
            work_dir: dir.join("work"),
            ..WorkerConfig::default()
        },
    );

    let config = ApiConfig {
        auth: AuthConfig::shared_secret(JWT_SECRET),
        webhook_secret: Some(WEBHOOK_SECRET.into()),
        admin_api_key: Some(ADMIN_KEY.into()),
        rate_limit_rps: 1000,
        rate_limit_burst: 1000,
        ..ApiConfig::default()
    };

    create_router(AppState::new(config, manager).unwrap(), None)
}

fn token_with(claims: Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn token(user: &str) -> String {
    token_with(json!({
        "sub": user,
        "email": format!("{}@example.com", user),
        "email_verified": true,
        "exp": chrono::Utc::now().timestamp() + 600,
    }))
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(user)))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, user: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(user)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn webhook(event_id: &str, user: &str, amount_total: u64, secret: &str) -> Request<Body> {
    let payload = json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": { "object": {
            "client_reference_id": user,
            "amount_total": amount_total,
            "payment_status": "paid",
        }},
    })
    .to_string();
    let signature = sign_payload(secret, chrono::Utc::now().timestamp(), payload.as_bytes()).unwrap();

    Request::builder()
        .method("POST")
        .uri("/webhooks/payments")
        .header(SIGNATURE_HEADER, signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload))
        .unwrap()
}

fn transition() -> Value {
    json!({
        "clip_a": "https://cdn.example.com/a.mp4",
        "clip_c": "https://cdn.example.com/c.mp4",
        "prompt": "slow dolly through the doorway",
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn balance(app: &Router, user: &str) -> u64 {
    let (status, body) = send(app, get("/api/credits/balance", user)).await;
    assert_eq!(status, StatusCode::OK);
    body["balance"].as_u64().unwrap()
}

async fn fund(app: &Router, user: &str, event_id: &str, cents: u64) {
    // First authenticated request creates the account
    balance(app, user).await;
    let (status, body) = send(app, webhook(event_id, user, cents, WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "credited");
    // History orders by millisecond timestamp
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_health_and_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let (status, body) = send(
        &app,
        Request::builder().uri("/ready").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["ledger"]["status"], "ok");
}

#[tokio::test]
async fn test_requests_without_token_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(transition().to_string()))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unverified_email_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let unverified = token_with(json!({
        "sub": "u-unverified",
        "email_verified": false,
        "exp": chrono::Utc::now().timestamp() + 600,
    }));
    let request = Request::builder()
        .uri("/api/credits/balance")
        .header(header::AUTHORIZATION, format!("Bearer {}", unverified))
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_submit_without_credits_is_payment_required() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let (status, body) = send(&app, post_json("/api/jobs", "broke", transition())).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "insufficient_funds");
    assert_eq!(body["balance"], 0);
    assert_eq!(body["required"], 5);

    // No job was created
    let (_, body) = send(&app, get("/api/jobs", "broke")).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_invalid_inputs_are_rejected_before_charging() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    fund(&app, "u1", "evt_invalid", 2500).await;

    let mut inputs = transition();
    inputs["prompt"] = json!("");
    let (status, body) = send(&app, post_json("/api/jobs", "u1", inputs)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
    assert_eq!(balance(&app, "u1").await, 25);
}

#[tokio::test]
async fn test_webhook_credits_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    assert_eq!(balance(&app, "u1").await, 0);

    let (status, body) = send(&app, webhook("evt_1", "u1", 2500, WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "credited");
    assert_eq!(body["balance_after"], 25);

    let (status, body) = send(&app, webhook("evt_1", "u1", 2500, WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "duplicate");

    assert_eq!(balance(&app, "u1").await, 25);
}

#[tokio::test]
async fn test_webhook_with_bad_signature_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    assert_eq!(balance(&app, "u1").await, 0);

    let (status, _) = send(&app, webhook("evt_forged", "u1", 2500, "wrong-secret")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(balance(&app, "u1").await, 0);
}

#[tokio::test]
async fn test_submit_debits_and_records_history() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    fund(&app, "u1", "evt_fund", 2500).await;

    let (status, job) = send(&app, post_json("/api/jobs", "u1", transition())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(job["state"], "queued");
    assert_eq!(job["cost"], 5);
    assert_eq!(balance(&app, "u1").await, 20);

    let job_id = job["job_id"].as_str().unwrap();
    let (status, fetched) = send(&app, get(&format!("/api/jobs/{}", job_id), "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["job_id"], job_id);
    assert_eq!(fetched["progress"], 0);
    assert!(fetched.get("generated_ref").is_none());
    assert!(fetched.get("output_ref").is_none());

    let (status, history) = send(&app, get("/api/credits/history", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = history["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tx| tx["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["debit", "topup"]);

    let (status, debits) = send(&app, get("/api/credits/history?kind=debit", "u1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(debits["transactions"].as_array().unwrap().len(), 1);
    assert_eq!(debits["transactions"][0]["delta"], -5);

    let (status, _) = send(&app, get("/api/credits/history?kind=bonus", "u1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_jobs_are_private_to_their_owner() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    fund(&app, "owner", "evt_owner", 1000).await;

    let (_, job) = send(&app, post_json("/api/jobs", "owner", transition())).await;
    let job_id = job["job_id"].as_str().unwrap();

    let (status, _) = send(&app, get(&format!("/api/jobs/{}", job_id), "intruder")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        post_json(&format!("/api/jobs/{}/cancel", job_id), "intruder", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = send(&app, get("/api/jobs", "intruder")).await;
    assert!(listed["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_refunds_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;
    fund(&app, "u1", "evt_cancel", 1000).await;

    let (_, job) = send(&app, post_json("/api/jobs", "u1", transition())).await;
    let job_id = job["job_id"].as_str().unwrap();
    assert_eq!(balance(&app, "u1").await, 5);

    let cancel = format!("/api/jobs/{}/cancel", job_id);
    let (status, cancelled) = send(&app, post_json(&cancel, "u1", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["state"], "failed");
    assert_eq!(cancelled["refunded"], true);
    assert_eq!(cancelled["failure_reason"], "cancelled by user");
    assert_eq!(cancelled["message"], "cancelled by user");
    assert_eq!(balance(&app, "u1").await, 10);

    let (status, _) = send(&app, post_json(&cancel, "u1", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(balance(&app, "u1").await, 10);
}

#[tokio::test]
async fn test_admin_reconcile_requires_key() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let without_key = Request::builder()
        .method("POST")
        .uri("/api/admin/reconcile")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, without_key).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let wrong_key = Request::builder()
        .method("POST")
        .uri("/api/admin/reconcile")
        .header(ADMIN_KEY_HEADER, "guess")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, wrong_key).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let with_key = Request::builder()
        .method("POST")
        .uri("/api/admin/reconcile")
        .header(ADMIN_KEY_HEADER, ADMIN_KEY)
        .body(Body::empty())
        .unwrap();
    let (status, report) = send(&app, with_key).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["timed_out"], 0);
}

#[tokio::test]
async fn test_quote_prices_without_charging() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path()).await;

    let mut inputs = transition();
    inputs["audio_prompt"] = json!("soft ambient hum");
    let (status, quote) = send(&app, post_json("/api/jobs/quote", "u1", inputs)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["total"], 6);
    assert_eq!(balance(&app, "u1").await, 0);
}
