//! Generation service HTTP client.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use tracing::{debug, info, warn};

use continuity_models::{GenerationStatus, JobInputs, OperationHandle};

use crate::error::{GenClientError, GenClientResult};
use crate::types::{GenerateRequest, HealthResponse, OperationResponse, SubmitResponse};

/// Configuration for the generation client.
#[derive(Debug, Clone)]
pub struct GenClientConfig {
    /// Base URL of the generation service
    pub base_url: String,
    /// Bearer token, if the service requires one
    pub api_key: Option<String>,
    /// Model name sent with each request
    pub model: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries for status polls (submits are retried by the caller)
    pub max_retries: u32,
}

impl Default for GenClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            model: "transition-v1".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }
}

impl GenClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("GENERATION_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            api_key: std::env::var("GENERATION_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("GENERATION_MODEL").unwrap_or_else(|_| "transition-v1".to_string()),
            timeout: Duration::from_secs(
                std::env::var("GENERATION_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("GENERATION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Client for the generation service.
#[derive(Debug, Clone)]
pub struct GenClient {
    http: Client,
    config: GenClientConfig,
}

impl GenClient {
    /// Create a new generation client.
    pub fn new(config: GenClientConfig) -> GenClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(GenClientError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> GenClientResult<Self> {
        Self::new(GenClientConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Check if the generation service is healthy.
    pub async fn health_check(&self) -> GenClientResult<bool> {
        match self.http.get(self.url("health")).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Generation service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Generation service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Start a generation and return its operation handle.
    pub async fn submit(&self, inputs: &JobInputs) -> GenClientResult<OperationHandle> {
        let url = self.url("v1/transitions:generate");
        let body = GenerateRequest::from_inputs(&self.config.model, inputs);

        debug!("Submitting generation request to {}", url);

        let response = self
            .authorize(self.http.post(&url).json(&body))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenClientError::from_status(status, body));
        }

        let created: SubmitResponse = response.json().await?;
        if created.name.is_empty() {
            return Err(GenClientError::InvalidResponse(
                "generation service returned an empty operation name".to_string(),
            ));
        }

        info!(operation = %created.name, "Generation operation started");
        Ok(OperationHandle::new(created.name))
    }

    /// Query the status of an operation.
    pub async fn poll(&self, handle: &OperationHandle) -> GenClientResult<GenerationStatus> {
        let url = self.url(&format!("v1/{}", handle.as_str()));

        let operation: OperationResponse = self
            .with_retry(|| async {
                let response = self.authorize(self.http.get(&url)).send().await?;
                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    return Err(GenClientError::from_status(status, body));
                }
                Ok(response.json::<OperationResponse>().await?)
            })
            .await?;

        operation.into_status()
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> GenClientResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = GenClientResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "Generation request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
