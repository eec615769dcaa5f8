//! Generation client error types.

use thiserror::Error;

pub type GenClientResult<T> = Result<T, GenClientError>;

#[derive(Debug, Error)]
pub enum GenClientError {
    #[error("Generation service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limited by generation service")]
    RateLimited,

    #[error("Request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GenClientError {
    /// Classify an unsuccessful HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => GenClientError::RateLimited,
            500..=599 => GenClientError::ServiceUnavailable(format!("{}: {}", status, body)),
            _ => GenClientError::Rejected { status, body },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GenClientError::ServiceUnavailable(_) | GenClientError::RateLimited => true,
            GenClientError::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(GenClientError::from_status(429, String::new()).is_retryable());
        assert!(GenClientError::from_status(503, "down".into()).is_retryable());
        assert!(!GenClientError::from_status(400, "bad prompt".into()).is_retryable());
        assert!(!GenClientError::from_status(401, String::new()).is_retryable());
    }
}
