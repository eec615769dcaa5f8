//! Application state.

use std::net::IpAddr;
use std::sync::Arc;

use continuity_worker::JobManager;

use crate::auth::TokenVerifier;
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::middleware::RateLimiterCache;
use crate::services::WebhookReconciler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub manager: JobManager,
    pub verifier: Arc<TokenVerifier>,
    pub reconciler: WebhookReconciler,
    pub user_limiter: RateLimiterCache<String>,
    pub ip_limiter: RateLimiterCache<IpAddr>,
}

impl AppState {
    /// Create new application state around a job manager.
    pub fn new(config: ApiConfig, manager: JobManager) -> Result<Self, ApiError> {
        let verifier = TokenVerifier::from_config(&config.auth)?;
        let reconciler = WebhookReconciler::new(
            manager.accounting().clone(),
            config.webhook_secret.clone(),
            config.webhook_tolerance_secs,
            config.price_per_credit_cents,
        );
        let user_limiter = RateLimiterCache::new(config.rate_limit_rps, config.rate_limit_burst);
        let ip_limiter = RateLimiterCache::new(config.rate_limit_rps, config.rate_limit_burst);

        Ok(Self {
            config: Arc::new(config),
            manager,
            verifier: Arc::new(verifier),
            reconciler,
            user_limiter,
            ip_limiter,
        })
    }
}
