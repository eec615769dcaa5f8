//! Identity token authentication.
//!
//! Bearer tokens are verified either against a JWKS endpoint (RS256, as
//! issued by Google or Firebase) or against a shared HS256 secret. The
//! `sub` claim is the ledger's user id.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use continuity_models::UserId;

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

/// JWKS cache TTL.
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600); // 1 hour

/// Minimum gap between refreshes triggered by an unknown key id.
const JWKS_MIN_REFRESH_GAP: Duration = Duration::from_secs(60);

/// Claims read from a verified identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// User ID
    pub sub: String,
    /// Email (if available)
    #[serde(default)]
    pub email: Option<String>,
    /// Email verified
    #[serde(default)]
    pub email_verified: Option<bool>,
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("JWKS request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid JWKS key: {0}")]
    Key(#[from] jsonwebtoken::errors::Error),
}

/// JWKS response.
#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Clone, Deserialize)]
struct JwkKey {
    kid: String,
    #[serde(default)]
    kty: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Cached JWKS keys, refreshed lazily.
pub struct JwksCache {
    http: Client,
    url: String,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: RwLock<Option<Instant>>,
}

impl JwksCache {
    pub fn new(url: impl Into<String>) -> Result<Self, JwksError> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            url: url.into(),
            keys: RwLock::new(HashMap::new()),
            last_refresh: RwLock::new(None),
        })
    }

    async fn refresh_keys(&self) -> Result<(), JwksError> {
        debug!(url = %self.url, "Refreshing JWKS keys");

        let jwks: JwksResponse = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty.as_deref().is_some_and(|kty| kty != "RSA") {
                continue;
            }
            let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                continue;
            };
            keys.insert(jwk.kid, DecodingKey::from_rsa_components(n, e)?);
        }

        let key_count = keys.len();
        *self.keys.write().await = keys;
        *self.last_refresh.write().await = Some(Instant::now());

        debug!("Refreshed {} JWKS keys", key_count);
        Ok(())
    }

    async fn get_key(&self, kid: &str) -> Option<DecodingKey> {
        let last = *self.last_refresh.read().await;
        let stale = last.map_or(true, |t| t.elapsed() > JWKS_CACHE_TTL);
        // Keys rotate; an unknown kid may be newer than the cache
        let unknown = !self.keys.read().await.contains_key(kid)
            && last.map_or(true, |t| t.elapsed() > JWKS_MIN_REFRESH_GAP);

        if stale || unknown {
            if let Err(e) = self.refresh_keys().await {
                warn!("Failed to refresh JWKS keys: {}", e);
            }
        }

        self.keys.read().await.get(kid).cloned()
    }
}

enum KeySource {
    Shared(DecodingKey),
    Jwks(JwksCache),
}

/// Verifies bearer tokens against the configured key source.
pub struct TokenVerifier {
    source: KeySource,
    issuers: Vec<String>,
    audience: Option<String>,
}

impl TokenVerifier {
    /// Build from config; a JWKS endpoint takes precedence over a shared secret.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ApiError> {
        let source = if let Some(url) = &config.jwks_url {
            info!(url = %url, "Verifying identity tokens against JWKS");
            KeySource::Jwks(JwksCache::new(url).map_err(|e| ApiError::internal(e.to_string()))?)
        } else if let Some(secret) = &config.jwt_secret {
            info!("Verifying identity tokens with a shared secret");
            KeySource::Shared(DecodingKey::from_secret(secret.as_bytes()))
        } else {
            return Err(ApiError::internal(
                "No identity key configured: set AUTH_JWKS_URL or AUTH_JWT_SECRET",
            ));
        };

        Ok(Self {
            source,
            issuers: config.issuers.clone(),
            audience: config.audience.clone(),
        })
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        if !self.issuers.is_empty() {
            validation.set_issuer(&self.issuers);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }

    /// Verify a token and return its claims.
    pub async fn verify_token(&self, token: &str) -> Result<IdentityClaims, ApiError> {
        let header = decode_header(token)
            .map_err(|e| ApiError::unauthorized(format!("Invalid token header: {}", e)))?;

        let (key, algorithm) = match &self.source {
            KeySource::Shared(key) => (key.clone(), Algorithm::HS256),
            KeySource::Jwks(cache) => {
                let kid = header
                    .kid
                    .ok_or_else(|| ApiError::unauthorized("Token missing key ID"))?;
                let key = cache
                    .get_key(&kid)
                    .await
                    .ok_or_else(|| ApiError::unauthorized("Unknown key ID"))?;
                (key, Algorithm::RS256)
            }
        };

        let token_data = decode::<IdentityClaims>(token, &key, &self.validation(algorithm))
            .map_err(|e| ApiError::unauthorized(format!("Token validation failed: {}", e)))?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }
        Ok(token_data.claims)
    }
}

/// Axum extractor for authenticated user.
#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Invalid Authorization header format"))?;

        let claims = state.verifier.verify_token(token).await?;

        if claims.email_verified == Some(false) {
            return Err(ApiError::forbidden("Email address is not verified"));
        }

        if !state.user_limiter.check(claims.sub.clone()).await {
            warn!(user_id = %claims.sub, "Rate limit exceeded");
            metrics::record_rate_limit_hit(parts.uri.path());
            return Err(ApiError::RateLimited);
        }

        let user_id = UserId::new(claims.sub);
        let accounting = state.manager.accounting();
        if accounting.store().get_user(&user_id).await?.is_none() {
            accounting.ensure_account(&user_id).await?;
            info!(user_id = %user_id, "Created account");
        }

        Ok(AuthUser {
            user_id,
            email: claims.email,
        })
    }
}
