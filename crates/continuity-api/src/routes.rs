//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers::{
    cancel_job, get_balance, get_credit_history, get_job, health, list_jobs, payment_webhook,
    quote_job, ready, reconcile, submit_job,
};
use crate::metrics::metrics_middleware;
use crate::middleware::{cors_layer, ip_rate_limit, request_id, request_logging, security_headers};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/quote", post(quote_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job));

    let credit_routes = Router::new()
        .route("/credits/balance", get(get_balance))
        .route("/credits/history", get(get_credit_history));

    // Per-user limits are applied by the auth extractor; admin is keyed by IP
    let admin_routes = Router::new()
        .route("/admin/reconcile", post(reconcile))
        .layer(middleware::from_fn_with_state(state.clone(), ip_rate_limit));

    let api_routes = Router::new()
        .merge(job_routes)
        .merge(credit_routes)
        .merge(admin_routes);

    let webhook_routes = Router::new()
        .route("/webhooks/payments", post(payment_webhook))
        .layer(middleware::from_fn_with_state(state.clone(), ip_rate_limit));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
