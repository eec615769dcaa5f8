//! API configuration.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Identity token verification settings.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// JWKS endpoint for RS256 tokens
    pub jwks_url: Option<String>,
    /// Shared HS256 secret, used when no JWKS endpoint is set
    pub jwt_secret: Option<String>,
    /// Accepted `iss` values (empty accepts any)
    pub issuers: Vec<String>,
    /// Required `aud` value
    pub audience: Option<String>,
}

impl AuthConfig {
    pub fn from_env() -> Self {
        Self {
            jwks_url: env_opt("AUTH_JWKS_URL"),
            jwt_secret: env_opt("AUTH_JWT_SECRET"),
            issuers: std::env::var("AUTH_ISSUERS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            audience: env_opt("AUTH_AUDIENCE"),
        }
    }

    /// HS256 config with a shared secret.
    pub fn shared_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: Some(secret.into()),
            ..Self::default()
        }
    }
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Per-user requests per second
    pub rate_limit_rps: u32,
    /// Per-user burst
    pub rate_limit_burst: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Identity verification
    pub auth: AuthConfig,
    /// Shared secret for payment notifications; unset rejects all of them
    pub webhook_secret: Option<String>,
    /// Maximum age of a signed payment notification
    pub webhook_tolerance_secs: i64,
    /// Price of one credit in the smallest currency unit
    pub price_per_credit_cents: u64,
    /// Key for admin endpoints; unset disables them
    pub admin_api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            auth: AuthConfig::default(),
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            price_per_credit_cents: 100,
            admin_api_key: None,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT", 30)),
            max_body_size: env_parse("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            auth: AuthConfig::from_env(),
            webhook_secret: env_opt("PAYMENT_WEBHOOK_SECRET"),
            webhook_tolerance_secs: env_parse(
                "PAYMENT_WEBHOOK_TOLERANCE_SECS",
                defaults.webhook_tolerance_secs,
            ),
            price_per_credit_cents: env_parse(
                "PRICE_PER_CREDIT_CENTS",
                defaults.price_per_credit_cents,
            )
            .max(1),
            admin_api_key: env_opt("ADMIN_API_KEY"),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
