//! Axum HTTP API for the transition job ledger.
//!
//! This crate provides:
//! - Job submission, status and cancellation for verified users
//! - Credit balance and ledger history
//! - Signed payment notifications that top up balances exactly once
//! - Admin-triggered recovery, rate limiting, security headers and metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod security;
pub mod services;
pub mod state;

pub use auth::{AuthUser, TokenVerifier};
pub use config::{ApiConfig, AuthConfig};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{StaleJobDetector, WebhookOutcome, WebhookReconciler};
pub use state::AppState;
